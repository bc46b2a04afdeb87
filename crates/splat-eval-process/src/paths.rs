use std::path::{Path, PathBuf};

use crate::{config::RunConfig, eval::Split};

/// Where the files of a run live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPaths {
    pub results_dir: PathBuf,
    pub scene_path: PathBuf,
}

impl RunPaths {
    pub fn new(config: &RunConfig) -> Self {
        let results_dir = Path::new(&config.workdir).join(&config.run_name);
        let scene_path = config
            .scene_path
            .as_ref()
            .map_or_else(|| results_dir.join("params.npz"), PathBuf::from);
        Self {
            results_dir,
            scene_path,
        }
    }

    pub fn eval_dir(&self, split: Split) -> PathBuf {
        self.results_dir.join(split.dir_name())
    }

    /// Where a copy of the config document `experiment` is kept.
    pub fn config_copy(&self, experiment: &Path) -> PathBuf {
        match experiment.extension() {
            Some(ext) => self.results_dir.join("config").with_extension(ext),
            None => self.results_dir.join("config"),
        }
    }
}

/// Name of the tracked run for an evaluation of `split`.
pub fn tracking_name(base: &str, split: Split) -> String {
    format!("{base}{}", split.run_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;
    use splat_eval_dataset::DatasetConfig;

    fn config() -> RunConfig {
        RunConfig::new(
            0,
            "cpu".to_owned(),
            "experiments/Replica".to_owned(),
            "room0_0".to_owned(),
            false,
            DatasetConfig::new(
                "replica".to_owned(),
                "data".to_owned(),
                "room0".to_owned(),
                0,
                -1,
                1,
                680,
                1200,
            ),
            MappingConfig::new(0.5, 60, true),
            5,
            false,
        )
    }

    #[test]
    fn derives_paths_from_run_name() {
        let paths = RunPaths::new(&config());
        assert_eq!(paths.results_dir, Path::new("experiments/Replica/room0_0"));
        assert_eq!(
            paths.scene_path,
            Path::new("experiments/Replica/room0_0/params.npz")
        );
        assert_eq!(
            paths.eval_dir(Split::Train),
            Path::new("experiments/Replica/room0_0/eval_train")
        );
        assert_eq!(
            paths.eval_dir(Split::Nvs),
            Path::new("experiments/Replica/room0_0/eval_nvs")
        );
    }

    #[test]
    fn explicit_scene_path_wins() {
        let config = config().with_scene_path(Some("/data/other/params100.npz".to_owned()));
        let paths = RunPaths::new(&config);
        assert_eq!(paths.scene_path, Path::new("/data/other/params100.npz"));
    }

    #[test]
    fn copies_keep_the_extension() {
        let paths = RunPaths::new(&config());
        assert_eq!(
            paths.config_copy(Path::new("configs/replica/splatam.json")),
            Path::new("experiments/Replica/room0_0/config.json")
        );
        assert_eq!(
            paths.config_copy(Path::new("configs/replica/splatam")),
            Path::new("experiments/Replica/room0_0/config")
        );
    }

    #[test]
    fn tracking_names_carry_the_split() {
        assert_eq!(tracking_name("room0", Split::Train), "room0_Train_Split");
        assert_eq!(tracking_name("room0", Split::Nvs), "room0_NVS_Split");
    }
}
