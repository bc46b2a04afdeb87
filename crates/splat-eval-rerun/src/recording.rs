use std::path::PathBuf;

use rerun::{RecordingStream, RecordingStreamBuilder, Scalars, TextDocument};

use crate::{RerunSink, TrackingError, TrackingInit, TrackingRun, TrackingService};

/// Records runs to rerun.io.
pub struct RerunTracking {
    sink: RerunSink,
    save_dir: PathBuf,
}

impl RerunTracking {
    /// `save_dir` is where recordings go when saving them to disk.
    pub fn new(sink: RerunSink, save_dir: PathBuf) -> Self {
        Self { sink, save_dir }
    }
}

impl TrackingService for RerunTracking {
    fn open(&self, init: TrackingInit) -> Result<Box<dyn TrackingRun>, TrackingError> {
        let builder = RecordingStreamBuilder::new(init.project.as_str()).recording_id(&init.name);

        let stream = match self.sink {
            RerunSink::Spawn => builder.spawn()?,
            RerunSink::Connect => builder.connect_grpc()?,
            RerunSink::Save => {
                let path = self.save_dir.join(format!("{}.rrd", init.name));
                log::info!("Saving recording to {}", path.display());
                builder.save(path)?
            }
        };

        let header = format!(
            "# {}\n\nentity: {}\n\ngroup: {}\n\n```json\n{}\n```",
            init.name,
            init.entity,
            init.group,
            serde_json::to_string_pretty(&init.config)?
        );
        stream.log_static("config", &TextDocument::from_markdown(header))?;

        log::info!("Started run '{}' in project '{}'", init.name, init.project);
        Ok(Box::new(RerunRun {
            name: init.name,
            stream: Some(stream),
        }))
    }
}

struct RerunRun {
    name: String,
    stream: Option<RecordingStream>,
}

impl RerunRun {
    fn stream(&self) -> Result<&RecordingStream, TrackingError> {
        self.stream
            .as_ref()
            .ok_or_else(|| TrackingError::Finished(self.name.clone()))
    }
}

impl TrackingRun for RerunRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn log_scalar(&mut self, key: &str, step: u64, value: f64) -> Result<(), TrackingError> {
        let stream = self.stream()?;
        stream.set_time_sequence("step", step as i64);
        stream.log(key, &Scalars::single(value))?;
        Ok(())
    }

    fn log_text(&mut self, key: &str, text: &str) -> Result<(), TrackingError> {
        self.stream()?.log(key, &TextDocument::new(text))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        // Dropping the stream flushes whatever is pending.
        let stream = self
            .stream
            .take()
            .ok_or_else(|| TrackingError::Finished(self.name.clone()))?;
        drop(stream);
        log::info!("Finished run '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_recording_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracking = RerunTracking::new(RerunSink::Save, dir.path().to_path_buf());

        let init = TrackingInit {
            project: "splat-eval-test".to_owned(),
            entity: "lab".to_owned(),
            group: "replica".to_owned(),
            name: "room0_Train_Split".to_owned(),
            config: serde_json::json!({ "seed": 0 }),
        };
        let mut run = tracking.open(init).expect("Failed to open run");
        run.log_scalar("eval/num_frames", 0, 5.0).expect("log");
        run.log_text("eval/summary", "done").expect("log");
        run.finish().expect("finish");

        assert!(matches!(run.finish(), Err(TrackingError::Finished(_))));
        assert!(matches!(
            run.log_scalar("eval/num_frames", 1, 1.0),
            Err(TrackingError::Finished(_))
        ));
        assert!(dir.path().join("room0_Train_Split.rrd").exists());
    }
}
