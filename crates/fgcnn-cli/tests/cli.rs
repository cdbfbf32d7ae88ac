use std::path::{Path, PathBuf};

use fgcnn_cli::{CheckpointFormat, PredictCommand, SummaryCommand, TrainCommand};

const RUN_CONFIG: &str = r#"{
    "features": {
        "sparse": {"user": 8, "item": 6},
        "dense": ["price"],
        "sequence": {"history": {"cardinality": 6, "max_len": 3, "combiner": "mean"}}
    },
    "model": {
        "embedding_size": 4,
        "conv_kernel_width": [2],
        "conv_filters": [2],
        "new_maps": [2],
        "hidden_size": [8],
        "init_std": 0.05
    },
    "trainer": {"optimizer": {"Adam": {"learning_rate": 0.01, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-7}}}
}"#;

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("run.json");
    std::fs::write(&path, RUN_CONFIG).unwrap();
    path
}

fn train_command(model_dir: &Path, config: &Path, steps: u64) -> TrainCommand {
    TrainCommand {
        model_dir: model_dir.to_path_buf(),
        config_path: Some(config.to_path_buf()),
        train_steps: steps,
        batch_size: 16,
        learning_rate: None,
        save_steps: 10,
        eval_steps: 5,
        max_to_keep: 2,
        resume: false,
        data_seed: 7,
        format: CheckpointFormat::Json,
    }
}

#[test]
fn test_train_writes_checkpoints_and_keeps_latest() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let model_dir = dir.path().join("model");

    let report = train_command(&model_dir, &config, 35).run().unwrap();
    assert_eq!(report.global_step, 35);
    assert!(report.final_loss.is_finite());
    assert!(report.eval_loss.is_finite());
    assert!(report.checkpoint.ends_with("checkpoint-35.json"));

    // Steps 10, 20, 30 and the final 35 were saved; two are kept.
    let mut names: Vec<String> = std::fs::read_dir(&model_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["checkpoint-30.json", "checkpoint-35.json"]);
}

#[test]
fn test_resume_continues_step_count() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let model_dir = dir.path().join("model");

    train_command(&model_dir, &config, 10).run().unwrap();
    let mut cmd = train_command(&model_dir, &config, 5);
    cmd.resume = true;
    let report = cmd.run().unwrap();
    assert_eq!(report.global_step, 15);
    assert!(report.checkpoint.ends_with("checkpoint-15.json"));
}

#[test]
fn test_predict_scores_batch_from_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let model_dir = dir.path().join("model");
    let mut train = train_command(&model_dir, &config, 12);
    train.format = CheckpointFormat::Binary;
    train.run().unwrap();

    let input = dir.path().join("batch.json");
    std::fs::write(
        &input,
        r#"{"sparse": {"user": [0, 7, 3], "item": [5, 1, 0]},
            "dense": {"price": [0.1, -2.0, 3.5]},
            "sequence": {"history": [[1, 2], [], [5, 5, 5, 5]]}}"#,
    )
    .unwrap();

    let predict = PredictCommand {
        model_dir: model_dir.clone(),
        input,
        format: CheckpointFormat::Binary,
    };
    let (step, scores) = predict.scores().unwrap();
    assert_eq!(step, 12);
    assert_eq!(scores.len(), 3);
    assert!(scores.iter().all(|p| (0.0..=1.0).contains(p)));

    // No JSON checkpoints were written.
    let json = PredictCommand {
        format: CheckpointFormat::Json,
        ..predict
    };
    assert!(json.scores().is_err());
}

#[test]
fn test_predict_reports_out_of_range_field() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let model_dir = dir.path().join("model");
    train_command(&model_dir, &config, 1).run().unwrap();

    let input = dir.path().join("batch.json");
    std::fs::write(&input, r#"{"sparse": {"user": [0], "item": [6]}, "dense": {"price": [1.0]}, "sequence": {"history": [[1]]}}"#)
        .unwrap();
    let err = PredictCommand {
        model_dir,
        input,
        format: CheckpointFormat::Json,
    }
    .scores()
    .unwrap_err();
    assert!(format!("{err:#}").contains("item"), "{err:#}");
}

#[test]
fn test_summary_lists_inputs_and_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let lines = SummaryCommand {
        config_path: Some(config),
    }
    .lines()
    .unwrap();

    assert_eq!(lines[0], "inputs:");
    for input in ["user", "item", "price", "history"] {
        assert!(lines[1..5].iter().any(|l| l.contains(input)), "{lines:?}");
    }
    assert!(lines.iter().any(|l| l.contains("feature_generation/stage_0/conv/kernel")));
    assert!(lines.iter().any(|l| l.contains("prediction/output/kernel")));
    assert!(lines.last().unwrap().starts_with("total parameters: "));
}
