//! VISA link to the oscilloscope.
//!
//! Supports resource strings like:
//! - "USB0::0xF4EC::0xEE38::SDSMMEBD2R1234::INSTR" (USB-TMC)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! VISA calls are blocking, so every transfer runs on Tokio's blocking pool
//! and is bounded by the link timeout.

use crate::hardware::capabilities::{
    decode_block, CommandPort, Endianness, LinkSettings, NumericType, ScopeLink,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use visa_rs::prelude::*;

struct Session {
    instrument: Instrument,
    // Dropping the resource manager closes every session it opened.
    rm: DefaultRM,
}

impl Session {
    fn release(self) {
        let Session { instrument, rm } = self;
        drop(instrument);
        drop(rm);
    }
}

/// Oscilloscope reached through a VISA resource manager.
pub struct VisaScope {
    session: Arc<Mutex<Option<Session>>>,
    link: Arc<Mutex<LinkSettings>>,
    resource: String,
}

impl VisaScope {
    /// Open `resource`, waiting at most `timeout` for the session.
    pub async fn open(resource: &str, timeout: Duration) -> Result<Self> {
        let resource_owned = resource.to_string();
        let session = tokio::task::spawn_blocking(move || -> Result<Session> {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let name = CString::new(resource_owned.clone())?;
            let instrument = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .with_context(|| format!("Failed to open VISA resource {resource_owned}"))?;
            Ok(Session { instrument, rm })
        })
        .await
        .context("VISA open task panicked")??;

        Ok(Self {
            session: Arc::new(Mutex::new(Some(session))),
            link: Arc::new(Mutex::new(LinkSettings {
                timeout,
                ..LinkSettings::default()
            })),
            resource: resource.to_string(),
        })
    }

    fn link(&self) -> LinkSettings {
        self.link
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Run a blocking transfer on the session, bounded by the link timeout.
    async fn transfer<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session, &LinkSettings) -> Result<T> + Send + 'static,
    {
        let link = self.link();
        let timeout = link.timeout;
        let session = Arc::clone(&self.session);
        let resource = self.resource.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("VISA session lock poisoned"))?;
            let open = guard
                .as_mut()
                .ok_or_else(|| anyhow!("VISA session {resource} is closed"))?;
            op(open, &link)
        });
        tokio::time::timeout(timeout, task)
            .await
            .with_context(|| format!("VISA {what} timed out after {timeout:?} on {}", self.resource))?
            .context("VISA I/O task panicked")?
    }
}

fn send(session: &mut Session, command: &str, link: &LinkSettings) -> Result<()> {
    let line = format!("{command}{}", link.write_termination);
    (&session.instrument)
        .write_all(line.as_bytes())
        .with_context(|| format!("VISA write failed for: {command}"))
}

#[async_trait]
impl CommandPort for VisaScope {
    async fn write(&self, command: &str) -> Result<()> {
        debug!("scope <- {}", command);
        let command = command.to_string();
        self.transfer("write", move |session, link| send(session, &command, link))
            .await
    }

    async fn query(&self, command: &str) -> Result<String> {
        let owned = command.to_string();
        let response = self
            .transfer("query", move |session, link| {
                send(session, &owned, link)?;
                let mut reader = BufReader::with_capacity(link.chunk_size, &session.instrument);
                let mut response = String::new();
                reader
                    .read_line(&mut response)
                    .with_context(|| format!("VISA read failed for: {owned}"))?;
                Ok(response)
            })
            .await?;
        let response = response.trim().to_string();
        debug!("scope {} -> {}", command, response);
        Ok(response)
    }

    async fn close(&self) -> Result<()> {
        let session = Arc::clone(&self.session);
        let released = tokio::task::spawn_blocking(move || take_session(&session))
            .await
            .context("VISA close task panicked")??;
        match released {
            Some(session) => {
                tokio::task::spawn_blocking(move || session.release())
                    .await
                    .context("VISA close task panicked")?;
                debug!("closed VISA session {}", self.resource);
            }
            None => debug!("VISA session {} already closed", self.resource),
        }
        Ok(())
    }
}

#[async_trait]
impl ScopeLink for VisaScope {
    async fn query_binary(
        &self,
        command: &str,
        numeric_type: NumericType,
        endianness: Endianness,
    ) -> Result<Vec<f64>> {
        let owned = command.to_string();
        let raw = self
            .transfer("binary query", move |session, link| {
                send(session, &owned, link)?;
                let mut reader = BufReader::with_capacity(link.chunk_size, &session.instrument);
                read_block(&mut reader).with_context(|| format!("VISA block read failed for: {owned}"))
            })
            .await?;
        debug!("scope {} -> {} byte block", command, raw.len());
        decode_block(&raw, numeric_type, endianness)
    }

    async fn configure_link(&self, settings: &LinkSettings) -> Result<()> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| anyhow!("VISA link settings lock poisoned"))?;
        *link = settings.clone();
        Ok(())
    }
}

/// Remove the session from its slot so later transfers fail instead of
/// reaching a released instrument.
fn take_session<S>(slot: &Mutex<Option<S>>) -> Result<Option<S>> {
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow!("VISA session lock poisoned"))?;
    Ok(guard.take())
}

/// Read a complete definite-length block, including anything before `#`.
fn read_block<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        raw.push(byte[0]);
        if byte[0] == b'#' {
            break;
        }
    }
    reader.read_exact(&mut byte)?;
    raw.push(byte[0]);
    let digits = (byte[0] as char)
        .to_digit(10)
        .ok_or_else(|| anyhow!("invalid block length digit"))? as usize;
    let mut len_field = vec![0u8; digits];
    reader.read_exact(&mut len_field)?;
    let len: usize = std::str::from_utf8(&len_field)?.parse()?;
    raw.extend_from_slice(&len_field);

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    raw.extend_from_slice(&data);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_session_empties_slot_once() {
        let slot = Mutex::new(Some("session"));
        assert_eq!(take_session(&slot).unwrap(), Some("session"));
        assert_eq!(take_session(&slot).unwrap(), None);
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn test_read_block_keeps_prefix_and_payload() {
        let mut input: &[u8] = b"DAT2,#14abcdEXTRA";
        let raw = read_block(&mut input).unwrap();
        assert_eq!(raw, b"DAT2,#14abcd");
        assert_eq!(input, b"EXTRA");
    }
}
