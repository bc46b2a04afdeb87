use crate::{TrackingError, TrackingRun};

/// Owns an open run and makes sure it is finished exactly once, also when the work in between
/// bails out early.
pub struct TrackingGuard {
    run: Option<Box<dyn TrackingRun>>,
}

impl TrackingGuard {
    pub fn new(run: Box<dyn TrackingRun>) -> Self {
        Self { run: Some(run) }
    }

    pub fn run_mut(&mut self) -> Option<&mut dyn TrackingRun> {
        self.run.as_mut().map(|run| run.as_mut() as &mut dyn TrackingRun)
    }

    /// Finish the run, reporting any error.
    pub fn finish(mut self) -> Result<(), TrackingError> {
        match self.run.take() {
            Some(mut run) => run.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.take() {
            log::info!("Closing run '{}'", run.name());
            if let Err(e) = run.finish() {
                log::warn!("Failed to finish run '{}': {e}", run.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Calls {
        scalars: Vec<(String, u64, f64)>,
        finished: usize,
    }

    struct MockRun(Arc<Mutex<Calls>>);

    impl TrackingRun for MockRun {
        fn name(&self) -> &str {
            "mock"
        }

        fn log_scalar(&mut self, key: &str, step: u64, value: f64) -> Result<(), TrackingError> {
            self.0.lock().scalars.push((key.to_owned(), step, value));
            Ok(())
        }

        fn log_text(&mut self, _key: &str, _text: &str) -> Result<(), TrackingError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<(), TrackingError> {
            self.0.lock().finished += 1;
            Ok(())
        }
    }

    #[test]
    fn finishes_on_drop() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        {
            let mut guard = TrackingGuard::new(Box::new(MockRun(calls.clone())));
            guard
                .run_mut()
                .expect("open run")
                .log_scalar("frames", 0, 5.0)
                .expect("log");
        }
        let calls = calls.lock();
        assert_eq!(calls.finished, 1);
        assert_eq!(calls.scalars, vec![("frames".to_owned(), 0, 5.0)]);
    }

    #[test]
    fn explicit_finish_only_closes_once() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let guard = TrackingGuard::new(Box::new(MockRun(calls.clone())));
        guard.finish().expect("finish");
        assert_eq!(calls.lock().finished, 1);
    }

    #[test]
    fn finishes_when_work_fails() {
        let calls = Arc::new(Mutex::new(Calls::default()));

        let work = |guard: &mut TrackingGuard| -> Result<(), String> {
            guard.run_mut().expect("open run");
            Err("evaluation failed".to_owned())
        };

        let result = {
            let mut guard = TrackingGuard::new(Box::new(MockRun(calls.clone())));
            work(&mut guard)
        };
        assert!(result.is_err());
        assert_eq!(calls.lock().finished, 1);
    }
}
