//! eBPF program loader
//!
//! Loads the compiled retransmit probe, attaches it to its tracepoint and
//! opens the map it publishes records on.

use crate::{
    config::{ProbeConfig, Transport},
    error::LoaderError,
    source::{PerfArraySource, ProbeSource, RingBufSource},
};
use aya::{
    maps::{perf::AsyncPerfEventArray, Map, MapError, RingBuf},
    programs::{ProgramError, TracePoint},
    Bpf,
};
use log::{info, warn};
use std::path::Path;

/// Reported when probe log forwarding is requested
pub const EBPF_LOG_UNSUPPORTED: &str =
    "eBPF logger not available in aya 0.12 - logging from the eBPF program will not be captured";

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load the probe object named by `config`
    pub fn load(config: &ProbeConfig) -> Result<Self, LoaderError> {
        let path = config
            .object_path
            .as_deref()
            .ok_or(LoaderError::NoObject)?;
        Self::load_file(path)
    }

    /// Load a probe object from `path`
    pub fn load_file(path: &Path) -> Result<Self, LoaderError> {
        info!("Loading eBPF object from: {:?}", path);
        let data = std::fs::read(path).map_err(|source| LoaderError::ReadObject {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_bytes(&data)
    }

    /// Load a probe object already in memory
    pub fn load_bytes(data: &[u8]) -> Result<Self, LoaderError> {
        let ebpf = Bpf::load(data)?;
        info!("eBPF program loaded successfully");
        Ok(Self { ebpf })
    }

    /// Forward log output from the probe
    ///
    /// Non-fatal. aya-log 0.2 only builds against aya 0.13 (`Ebpf`), so on
    /// this aya 0.12 stack kernel-side log statements are not captured.
    pub fn init_logger(&mut self) {
        warn!("{}", EBPF_LOG_UNSUPPORTED);
    }

    /// Attach the retransmit program to its tracepoint
    pub fn attach_tracepoint(&mut self, config: &ProbeConfig) -> Result<(), LoaderError> {
        let name = &config.program;
        let program_error = |source: ProgramError| LoaderError::Program {
            name: name.clone(),
            source,
        };

        let program: &mut TracePoint = self
            .ebpf
            .program_mut(name)
            .ok_or_else(|| LoaderError::ProgramNotFound(name.clone()))?
            .try_into()
            .map_err(program_error)?;
        program.load().map_err(program_error)?;
        program
            .attach(&config.tracepoint_category, &config.tracepoint_name)
            .map_err(program_error)?;

        info!(
            "  ✓ Attached {} to {}:{} tracepoint",
            name, config.tracepoint_category, config.tracepoint_name
        );
        Ok(())
    }

    /// Open the record map as a readable source
    ///
    /// Must be called from within a tokio runtime; the map's file
    /// descriptors are registered with the reactor here.
    pub fn open_source(&mut self, config: &ProbeConfig) -> Result<ProbeSource, LoaderError> {
        let map = self.take_map(&config.map)?;
        let map_error = |source: MapError| LoaderError::Map {
            name: config.map.clone(),
            source,
        };

        match config.transport {
            Transport::Ringbuf => {
                let ring_buf = RingBuf::try_from(map).map_err(map_error)?;
                info!("Reading records from ring buffer {:?}", config.map);
                Ok(ProbeSource::RingBuf(RingBufSource::new(ring_buf)?))
            }
            Transport::Perf => {
                let perf_array = AsyncPerfEventArray::try_from(map).map_err(map_error)?;
                info!("Reading records from perf event array {:?}", config.map);
                Ok(ProbeSource::Perf(PerfArraySource::spawn(
                    perf_array,
                    config.channel_capacity,
                )?))
            }
        }
    }

    fn take_map(&mut self, name: &str) -> Result<Map, LoaderError> {
        self.ebpf
            .take_map(name)
            .ok_or_else(|| LoaderError::MapNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_load_missing_object() {
        let config = ProbeConfig {
            object_path: Some(PathBuf::from("/nonexistent/retransmit-probe.o")),
            ..ProbeConfig::default()
        };

        match ProbeLoader::load(&config) {
            Err(LoaderError::ReadObject { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/retransmit-probe.o"));
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("load should fail"),
        }
    }

    #[test]
    fn test_load_without_path() {
        assert!(matches!(
            ProbeLoader::load(&ProbeConfig::default()),
            Err(LoaderError::NoObject)
        ));
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(
            ProbeLoader::load_bytes(b"not an elf object"),
            Err(LoaderError::Load(_))
        ));
    }
}
