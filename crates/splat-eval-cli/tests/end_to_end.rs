use std::path::Path;

use burn::tensor::TensorData;
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use splat_eval_cli::{Cli, run};
use splat_eval_serde::write_npz;

const FRAMES: usize = 5;

fn write_icl_sequence(root: &Path) {
    std::fs::create_dir_all(root.join("rgb")).expect("mkdir");
    std::fs::create_dir_all(root.join("depth")).expect("mkdir");

    let mut trajectory = String::new();
    for i in 0..FRAMES {
        let color: RgbImage = ImageBuffer::from_pixel(8, 6, Rgb([40, 80, 120]));
        color
            .save(root.join(format!("rgb/{i}.png")))
            .expect("Failed to save color");
        let depth: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(8, 6, Luma([5000]));
        depth
            .save(root.join(format!("depth/{i}.png")))
            .expect("Failed to save depth");
        trajectory.push_str(&format!("{i} {}.0 0 0 0 0 0 1\n", i));
    }
    std::fs::write(root.join("livingroom0.gt.freiburg"), trajectory).expect("write trajectory");
}

fn write_scene(path: &Path) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");

    let mut rots = vec![0.0f32; 4 * FRAMES];
    rots[..FRAMES].fill(1.0);
    let means = TensorData::new(vec![0.0f32; 30], [10, 3]);
    let colors = TensorData::new(vec![0.5f32; 30], [10, 3]);
    let opacities = TensorData::new(vec![0.0f32; 10], [10, 1]);
    let rots = TensorData::new(rots, [1, 4, FRAMES]);
    let trans = TensorData::new(vec![0.0f32; 3 * FRAMES], [1, 3, FRAMES]);

    write_npz(
        path,
        [
            ("means3D", &means),
            ("rgb_colors", &colors),
            ("logit_opacities", &opacities),
            ("cam_unnorm_rots", &rots),
            ("cam_trans", &trans),
        ],
    )
    .expect("Failed to write scene");
}

#[test]
fn evaluates_icl_train_split() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    write_icl_sequence(&root.join("data/ICL/living_room_traj0"));
    write_scene(&root.join("experiments/ICL/living_room_0/params.npz"));

    let camera_config = root.join("icl.json");
    std::fs::write(
        &camera_config,
        r#"{
            "dataset_name": "icl",
            "camera_params": {
                "image_height": 6, "image_width": 8,
                "fx": 4.0, "fy": 4.0, "cx": 4.0, "cy": 3.0,
                "png_depth_scale": 5000.0
            }
        }"#,
    )
    .expect("write camera config");

    let config = serde_json::json!({
        "seed": 0,
        "primary_device": "cpu",
        "workdir": root.join("experiments/ICL").display().to_string(),
        "run_name": "living_room_0",
        "load_checkpoint": false,
        "data": {
            "dataset_name": "icl",
            "basedir": root.join("data/ICL").display().to_string(),
            "gradslam_data_cfg": camera_config.display().to_string(),
            "sequence": "living_room_traj0",
            "start": 0,
            "end": -1,
            "stride": 1,
            "desired_image_height": 6,
            "desired_image_width": 8,
            "num_frames": -1
        },
        "mapping": { "sil_thres": 0.5, "num_iters": 30, "add_new_gaussians": true },
        "eval_every": 1,
        "use_wandb": false
    });
    let experiment = root.join("splatam_icl.json");
    std::fs::write(&experiment, config.to_string()).expect("write config");

    let outcome = run(&Cli { experiment }).expect("Evaluation failed");

    let results = root.join("experiments/ICL/living_room_0");
    let eval_dir = results.join("eval_train");
    assert_eq!(outcome.eval_dir, eval_dir);
    assert_eq!(outcome.report.frames_evaluated, FRAMES);
    assert_eq!(outcome.report.num_gaussians, 10);

    assert!(eval_dir.is_dir());
    assert!(eval_dir.join("manifest.json").is_file());
    assert!(eval_dir.join("gt_rgb/gt_0000.png").is_file());
    assert!(results.join("config.json").is_file());
}

#[test]
fn unsupported_dataset_exits_with_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let experiment = dir.path().join("config.json");
    let config = serde_json::json!({
        "seed": 0,
        "primary_device": "cpu",
        "workdir": dir.path().join("experiments").display().to_string(),
        "run_name": "run",
        "load_checkpoint": true,
        "data": {
            "dataset_name": "kitti",
            "basedir": "data",
            "sequence": "00",
            "start": 0,
            "end": -1,
            "stride": 1,
            "desired_image_height": 6,
            "desired_image_width": 8
        },
        "mapping": { "sil_thres": 0.5, "num_iters": 30, "add_new_gaussians": true },
        "eval_every": 1,
        "use_wandb": false
    });
    std::fs::write(&experiment, config.to_string()).expect("write config");

    let error = run(&Cli { experiment }).expect_err("kitti is not supported");
    assert!(format!("{error:#}").contains("kitti"));
}

#[test]
fn unknown_device_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let experiment = dir.path().join("config.json");
    let config = serde_json::json!({
        "seed": 0,
        "primary_device": "tpu:0",
        "workdir": "experiments",
        "run_name": "run",
        "load_checkpoint": true,
        "data": {
            "dataset_name": "icl",
            "basedir": "data",
            "sequence": "00",
            "start": 0,
            "end": -1,
            "stride": 1,
            "desired_image_height": 6,
            "desired_image_width": 8
        },
        "mapping": { "sil_thres": 0.5, "num_iters": 30, "add_new_gaussians": true },
        "eval_every": 1,
        "use_wandb": false
    });
    std::fs::write(&experiment, config.to_string()).expect("write config");

    let error = run(&Cli { experiment }).expect_err("tpu is not a device");
    assert!(error.to_string().contains("tpu"));
}
