//! A monitoring session: one Monitor plus where its output goes.

use rose_core::{Monitor, MonitorStats, NexusConfig, Observation, PatternLibrary, RoseError, TickReport};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

use crate::error::Result;

/// Load a library file, or the built-in priors without one. A library that
/// fails construction is a hard error.
pub fn load_library(path: Option<&str>) -> Result<PatternLibrary> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            let library = PatternLibrary::from_json(&json)?;
            info!(library_path = path, "Loaded pattern library");
            Ok(library)
        }
        None => Ok(PatternLibrary::default_priors()),
    }
}

pub struct Session {
    monitor: Monitor,
    results: Box<dyn Write + Send>,
    frames: Option<Box<dyn Write + Send>>,
    frames_written: usize,
    reestimate_every: u64,
}

impl Session {
    pub fn new(
        library: PatternLibrary,
        mut config: NexusConfig,
        results: Box<dyn Write + Send>,
        frames: Option<Box<dyn Write + Send>>,
        reestimate_every: u64,
    ) -> Self {
        if frames.is_some() {
            config.record_frames = true;
        }
        if reestimate_every > 0 {
            config.collect_statistics = true;
        }
        Self {
            monitor: Monitor::new(library, config),
            results,
            frames,
            frames_written: 0,
            reestimate_every,
        }
    }

    /// Buffered writer over a freshly created file.
    pub fn file_writer(path: &Path) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }

    /// Results go to `path`, or stdout when unset.
    pub fn results_writer(path: Option<&str>) -> Result<Box<dyn Write + Send>> {
        Ok(match path {
            Some(path) => Self::file_writer(Path::new(path))?,
            None => Box::new(io::stdout()),
        })
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Run one tick and write its report and frames through to disk.
    /// `Ok(None)` when `cancel` was raised before the tick committed.
    pub fn tick(&mut self, observations: &[Observation], cancel: &AtomicBool) -> Result<Option<TickReport>> {
        let report = match self.monitor.tick_cancellable(observations, cancel) {
            Ok(report) => report,
            Err(RoseError::Cancelled) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::to_writer(&mut self.results, &report)?;
        self.results.write_all(b"\n")?;
        self.results.flush()?;

        // The recorder never holds more than one tick of frames
        let frames = self.monitor.frames_mut().drain();
        if let Some(out) = self.frames.as_mut() {
            for frame in &frames {
                serde_json::to_writer(&mut *out, frame)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            self.frames_written += frames.len();
        }

        let ticks = self.monitor.ticks();
        if self.reestimate_every > 0 && ticks % self.reestimate_every == 0 {
            let used = self.monitor.reestimate_library();
            info!(tick = ticks, observations = used, "Library re-estimated");
        }
        Ok(Some(report))
    }

    /// Flush outputs and log the session totals.
    pub fn finish(mut self) -> Result<MonitorStats> {
        self.results.flush()?;
        if let Some(out) = self.frames.as_mut() {
            out.flush()?;
            info!(frames = self.frames_written, "Frames exported");
        }

        let stats = self.monitor.stats().clone();
        if stats.malformed > 0 {
            warn!(malformed = stats.malformed, "Feed contained malformed attribute sets");
        }
        info!(
            ticks = stats.ticks,
            cycles = stats.cycles,
            switches = stats.switches,
            removals = stats.removals,
            degenerate = stats.degenerate,
            eigen_fallbacks = stats.eigen_fallbacks,
            cancelled = stats.cancelled,
            duplicates = stats.duplicates,
            live_neurons = self.monitor.store().len(),
            "Session complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rose_core::RawAttributes;
    use std::sync::{Arc, Mutex};

    /// Shared in-memory sink so the test can read what the session wrote.
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn page() -> Vec<Observation> {
        vec![
            Observation::seen("a", RawAttributes::new("li"), vec![RawAttributes::new("li")]),
            Observation::seen("b", RawAttributes::new("button"), vec![]),
        ]
    }

    #[test]
    fn test_one_results_line_per_tick() {
        let sink = Sink::default();
        let mut session = Session::new(
            PatternLibrary::default_priors(),
            NexusConfig::default(),
            Box::new(sink.clone()),
            None,
            0,
        );
        let never = AtomicBool::new(false);
        for _ in 0..3 {
            assert!(session.tick(&page(), &never).unwrap().is_some());
        }
        let stats = session.finish().unwrap();
        assert_eq!(stats.ticks, 3);

        let written = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: TickReport = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.tick, 2);
        assert_eq!(last.results.len(), 2);
    }

    #[test]
    fn test_cancelled_tick_writes_nothing() {
        let sink = Sink::default();
        let mut session = Session::new(
            PatternLibrary::default_priors(),
            NexusConfig::default(),
            Box::new(sink.clone()),
            None,
            0,
        );
        let cancel = AtomicBool::new(true);
        assert!(session.tick(&page(), &cancel).unwrap().is_none());
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(session.monitor().store().is_empty());
    }

    #[test]
    fn test_reestimate_cadence_and_frames_file() {
        let frames = std::env::temp_dir().join(format!("rose-frames-{}.jsonl", std::process::id()));
        let mut session = Session::new(
            PatternLibrary::default_priors(),
            NexusConfig::default(),
            Box::new(io::sink()),
            Some(Session::file_writer(&frames).unwrap()),
            2,
        );
        assert!(session.monitor().config().record_frames);
        assert!(session.monitor().config().collect_statistics);

        let never = AtomicBool::new(false);
        session.tick(&page(), &never).unwrap();
        assert_eq!(session.monitor().statistics().total(), 2);
        assert!(session.monitor().frames().frames().is_empty());
        assert_eq!(fs::read_to_string(&frames).unwrap().lines().count(), 1);

        session.tick(&page(), &never).unwrap();
        assert_eq!(session.monitor().statistics().total(), 0);
        assert!(session.monitor().frames().frames().is_empty());
        session.finish().unwrap();

        let written = fs::read_to_string(&frames).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|frame| frame.is_object()));
        let _ = fs::remove_file(&frames);
    }

    #[test]
    fn test_results_reach_disk_before_finish() {
        let dir = std::env::temp_dir().join(format!("rose-live-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let results = dir.join("results.jsonl");
        let results_str = results.to_str().unwrap();

        let mut session = Session::new(
            PatternLibrary::default_priors(),
            NexusConfig::default(),
            Session::results_writer(Some(results_str)).unwrap(),
            None,
            0,
        );
        let never = AtomicBool::new(false);
        for tick in 0..3u64 {
            session.tick(&page(), &never).unwrap();
            // A follower of the results file sees each tick as it lands
            let written = fs::read_to_string(&results).unwrap();
            let lines: Vec<&str> = written.lines().collect();
            assert_eq!(lines.len() as u64, tick + 1);
            let report: TickReport = serde_json::from_str(lines[tick as usize]).unwrap();
            assert_eq!(report.tick, tick);
        }
        session.finish().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_library_file_is_hard_error() {
        let path = std::env::temp_dir().join(format!("rose-lib-{}.json", std::process::id()));
        fs::write(&path, r#"{"patterns": []}"#).unwrap();
        let err = load_library(path.to_str()).err().unwrap();
        assert!(err.to_string().contains("construction"));
        let _ = fs::remove_file(&path);
        assert!(load_library(None).is_ok());
    }
}
