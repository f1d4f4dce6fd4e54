//! Siglent SDS oscilloscope command set.
//!
//! Setup writes the channel, timebase, trigger and waveform settings from
//! [`OscilloscopeConfig`], then waits for `*OPC?`. Each capture arms a single
//! acquisition and polls the interrupt register (`INR?`) until the
//! new-signal bit is set.

use crate::config::{OscilloscopeConfig, WaveformFormat};
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{Endianness, LinkSettings, NumericType, ScopeLink};
use crate::instrument::poll::{poll_until, PollSettings};
use crate::sweep::layout::TraceHeader;
use anyhow::{anyhow, Context};
use tracing::{debug, info, warn};

/// Arms one acquisition.
pub const ARM_COMMAND: &str = "ARM";

/// `INR?` bit: a new signal has been acquired.
pub const INR_NEW_SIGNAL: u32 = 1 << 0;

/// `INR?` bit: the acquisition timed out waiting for a trigger.
pub const INR_TIMEOUT: u32 = 1 << 3;

/// Key of the derived sample interval in a trace header.
pub const SAMPLE_INTERVAL_KEY: &str = "sample_interval";

const WAVEFORM_QUERY: &str = ":WAV:DATA?";

/// Oscilloscope driven over a [`ScopeLink`].
pub struct Oscilloscope<'a> {
    link: &'a dyn ScopeLink,
    config: &'a OscilloscopeConfig,
    poll: PollSettings,
}

impl<'a> Oscilloscope<'a> {
    pub fn new(link: &'a dyn ScopeLink, config: &'a OscilloscopeConfig, poll: PollSettings) -> Self {
        Self { link, config, poll }
    }

    /// Apply link parameters and the acquisition configuration.
    pub async fn setup(&self) -> SweepResult<()> {
        let config = self.config;
        let ch = config.channel;

        self.link
            .configure_link(&LinkSettings {
                timeout: config.timeout,
                write_termination: "\n".to_string(),
                read_termination: "\n".to_string(),
                chunk_size: config.chunk_size,
            })
            .await?;

        let idn = self.link.query("*IDN?").await.context("identify oscilloscope")?;
        info!("Oscilloscope: {}", idn);

        let mut commands = vec![
            format!("CHAN{ch}:COUPLING {}", config.coupling),
            format!("CHAN{ch}:ATTN {}", config.attenuation),
            format!(":TIM:SCAL {}", config.timescale),
            format!("CHAN{ch}:SCAL {}", config.scale),
            format!("CHAN{ch}:OFST {}", config.offset),
            format!("CHAN{ch}:BWL {}", if config.bandwidth_limit { "ON" } else { "OFF" }),
            format!(":TRIGger:SOURce CHAN{ch}"),
            format!(":TRIGger:MODE {}", config.trigger_mode),
            format!(":WAV:SOUR CHAN{ch}"),
            ":WAV:MODE NORM".to_string(),
            format!(":WAV:POINt {}", config.npoints),
        ];
        match config.waveform_format {
            WaveformFormat::Ascii => commands.push(":WAV:FORM ASC".to_string()),
            WaveformFormat::Binary => {
                commands.push(":WAV:FORM WORD".to_string());
                commands.push(":WAV:BYTeorder LSB".to_string());
            }
        }
        if config.averages > 1 {
            commands.push(":ACQuire:TYPE AVERage".to_string());
            commands.push(format!(":ACQuire:AVER {}", config.averages));
        } else {
            commands.push(":ACQuire:TYPE NORMal".to_string());
        }

        for command in &commands {
            self.write(command).await?;
        }
        self.wait_operation_complete().await
    }

    async fn write(&self, command: &str) -> SweepResult<()> {
        debug!("scope <- {}", command);
        self.link
            .write(command)
            .await
            .with_context(|| format!("scope write '{command}'"))?;
        Ok(())
    }

    async fn query(&self, command: &str) -> SweepResult<String> {
        let response = self
            .link
            .query(command)
            .await
            .with_context(|| format!("scope query '{command}'"))?;
        Ok(response)
    }

    /// Poll `*OPC?` until the scope reports completion.
    pub async fn wait_operation_complete(&self) -> SweepResult<()> {
        poll_until(
            "oscilloscope operation complete",
            self.poll.interval,
            self.poll.opc_timeout,
            move || async move { Ok::<_, SweepError>(self.query("*OPC?").await?.trim() == "1") },
        )
        .await
    }

    /// Start a single acquisition.
    pub async fn arm(&self) -> SweepResult<()> {
        self.write(ARM_COMMAND).await
    }

    /// Poll the interrupt register until a new signal has been acquired.
    ///
    /// A set timeout bit is logged and polling continues until the
    /// acquisition deadline.
    pub async fn wait_for_acquisition(&self) -> SweepResult<()> {
        poll_until(
            "oscilloscope acquisition",
            self.poll.interval,
            self.poll.acquisition_timeout,
            move || async move {
                let response = self.query("INR?").await?;
                let bits: u32 = response
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid INR response '{response}'"))?;
                if bits & INR_TIMEOUT != 0 {
                    warn!("Oscilloscope reported an acquisition timeout, still waiting");
                }
                Ok::<_, SweepError>(bits & INR_NEW_SIGNAL != 0)
            },
        )
        .await
    }

    /// Transfer the acquired waveform.
    pub async fn fetch_waveform(&self) -> SweepResult<Vec<f64>> {
        let samples = match self.config.waveform_format {
            WaveformFormat::Ascii => parse_ascii_waveform(&self.query(WAVEFORM_QUERY).await?)?,
            WaveformFormat::Binary => self
                .link
                .query_binary(WAVEFORM_QUERY, NumericType::I16, Endianness::Little)
                .await
                .context("binary waveform transfer")?,
        };
        debug!("fetched {} samples", samples.len());
        Ok(samples)
    }

    /// Instrument settings recorded in each trace header.
    pub async fn read_state(&self) -> SweepResult<TraceHeader> {
        let ch = self.config.channel;
        let fields = [
            "*IDN".to_string(),
            ":TIM:SCAL".to_string(),
            format!(":CHAN{ch}:SCAL"),
            format!(":CHAN{ch}:COUPling"),
            format!(":CHAN{ch}:DISPlay"),
            ":WAV:XOR".to_string(),
            ":WAV:XINC".to_string(),
        ];

        let mut state = TraceHeader::new();
        for field in fields {
            let query = format!("{field}?");
            let value = self.query(&query).await?;
            state.insert(query, value);
        }

        let rate = self.query(":ACQuire:SRATe?").await?;
        let rate: f64 = rate
            .trim()
            .parse()
            .with_context(|| format!("invalid sample rate '{rate}'"))?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(anyhow!("oscilloscope reported sample rate {rate}").into());
        }
        state.insert(":ACQuire:SRATe?".to_string(), rate.to_string());
        state.insert(SAMPLE_INTERVAL_KEY.to_string(), (1.0 / rate).to_string());
        Ok(state)
    }

    /// Arm, wait, and return the waveform with the instrument state.
    pub async fn capture(&self) -> SweepResult<(TraceHeader, Vec<f64>)> {
        self.arm().await?;
        self.wait_for_acquisition().await?;
        let samples = self.fetch_waveform().await?;
        let header = self.read_state().await?;
        Ok((header, samples))
    }
}

fn parse_ascii_waveform(payload: &str) -> SweepResult<Vec<f64>> {
    let samples = payload
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f64>()
                .with_context(|| format!("invalid waveform sample '{v}'"))
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;
    Ok(samples)
}
