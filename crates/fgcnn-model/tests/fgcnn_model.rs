use fgcnn_checkpoint::{BinaryCheckpointer, Checkpointer, JsonCheckpointer};
use fgcnn_layers::sequence_pooling::PoolingMode;
use fgcnn_model::{
    build_fgcnn, FeatureBatch, FeatureSpec, FgcnnConfig, FgcnnError, InputKind, ParameterGroup,
    SequenceInput, Trainer, TrainerConfig, FGCNN,
};
use fgcnn_optimizer::OptimizerConfig;

fn click_spec() -> FeatureSpec {
    FeatureSpec::from_json_str(r#"{"sparse": {"f1": 4, "f2": 3}, "dense": ["f3"]}"#).unwrap()
}

fn click_batch() -> FeatureBatch {
    FeatureBatch::new(4)
        .with_sparse("f1", vec![0, 1, 2, 3])
        .with_sparse("f2", vec![2, 0, 1, 2])
        .with_dense("f3", vec![0.3, -1.2, 5.0, 0.0])
}

fn small_config() -> FgcnnConfig {
    FgcnnConfig::new()
        .with_embedding_size(4)
        .with_conv_stages(vec![2], vec![3], vec![2])
        .with_hidden_size(vec![16])
}

#[test]
fn test_input_count_equals_field_count() {
    let spec = FeatureSpec::new()
        .with_sparse("user", 10)
        .with_sparse("item", 20)
        .with_dense("price")
        .with_dense("age")
        .with_sequence("history", 20, 5, PoolingMode::Mean);
    let model = build_fgcnn(&spec, &FgcnnConfig::default()).unwrap();

    let inputs = model.inputs();
    assert_eq!(inputs.len(), 5);
    let names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["user", "item", "price", "age", "history"]);
    assert_eq!(inputs[4].kind, InputKind::Sequence);
    assert_eq!(inputs[4].width, 5);
}

#[test]
fn test_mismatched_lists_fail_before_anything_else() {
    let config = FgcnnConfig::new().with_conv_stages(vec![6, 5], vec![4], vec![3, 3]);

    let err = build_fgcnn(&click_spec(), &config).unwrap_err();
    assert!(matches!(err, FgcnnError::Validation(_)));
    let message = err.to_string();
    for list in ["conv_kernel_width", "conv_filters", "new_maps"] {
        assert!(message.contains(list), "{message}");
    }

    // Reported even when the feature spec is invalid too.
    let err = build_fgcnn(&FeatureSpec::new(), &config).unwrap_err();
    assert!(err.to_string().contains("conv_filters=1"));
}

#[test]
fn test_same_seed_same_initial_output() {
    let config = FgcnnConfig::default().with_init_std(0.05);
    let a = build_fgcnn(&click_spec(), &config).unwrap();
    let b = build_fgcnn(&click_spec(), &config).unwrap();
    assert_eq!(a.predict(&click_batch()).unwrap(), b.predict(&click_batch()).unwrap());

    let c = build_fgcnn(&click_spec(), &config.with_seed(7)).unwrap();
    assert_ne!(a.predict(&click_batch()).unwrap(), c.predict(&click_batch()).unwrap());
}

#[test]
fn test_spec_without_sequence_fields() {
    let model = build_fgcnn(&click_spec(), &small_config()).unwrap();
    assert!(model.embedding().raw().field_names().eq(["f1", "f2"]));

    // Sequence columns in the batch are not consulted.
    let extra = click_batch()
        .with_sequence("unused", SequenceInput::from_ragged(&vec![vec![1]; 4], 2));
    assert_eq!(
        model.predict(&extra).unwrap(),
        model.predict(&click_batch()).unwrap()
    );
}

#[test]
fn test_click_model_with_default_stages() {
    let config = FgcnnConfig::new()
        .with_embedding_size(8)
        .with_conv_stages(vec![6, 5], vec![4, 4], vec![3, 3])
        .with_hidden_size(vec![128]);
    let model = build_fgcnn(&click_spec(), &config).unwrap();

    let scores = model.predict(&click_batch()).unwrap();
    assert_eq!(scores.shape(), &[4, 1]);
    assert!(scores.data().iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_out_of_range_id_names_field() {
    let model = build_fgcnn(&click_spec(), &small_config()).unwrap();
    let batch = click_batch().with_sparse("f2", vec![0, 1, 3, 0]);
    let err = model.predict(&batch).unwrap_err();
    assert!(matches!(err, FgcnnError::Input { ref field, .. } if field == "f2"));

    let err = model.predict(&FeatureBatch::new(4).with_sparse("f1", vec![0; 4])).unwrap_err();
    assert!(matches!(err, FgcnnError::Input { .. }));
}

#[test]
fn test_max_pooling_ignores_padding() {
    let spec = FeatureSpec::new()
        .with_sparse("user", 2)
        .with_sequence("history", 3, 3, PoolingMode::Max);
    let config = small_config().with_init_std(0.5);
    let mut model = build_fgcnn(&spec, &config).unwrap();

    // Id 0 is the padding id: make it the largest row so leaking it would show.
    for (name, table) in model.named_parameters_mut() {
        if name.ends_with("embedding/history") {
            let dim = table.shape()[1];
            for v in &mut table.data_mut()[..dim] {
                *v = 100.0;
            }
            for v in &mut table.data_mut()[dim..] {
                *v = -1.0;
            }
        }
    }

    let batch = |rows: &[Vec<usize>]| {
        FeatureBatch::new(1)
            .with_sparse("user", vec![1])
            .with_sequence("history", SequenceInput::from_ragged(rows, 3))
    };
    let padded = model.predict(&batch(&[vec![1, 2]])).unwrap();
    let explicit = model
        .predict(
            &FeatureBatch::new(1)
                .with_sparse("user", vec![1])
                .with_sequence("history", SequenceInput::new(vec![1, 2, 2], vec![3], 3).unwrap()),
        )
        .unwrap();
    assert_eq!(padded, explicit);
}

#[test]
fn test_save_and_load_reproduces_output() {
    let mut model = build_fgcnn(&click_spec(), &small_config().with_linear_logit(true)).unwrap();
    let mut trainer = Trainer::new(
        model.clone(),
        &TrainerConfig::default().with_optimizer(OptimizerConfig::Sgd { learning_rate: 0.1 }),
    )
    .unwrap();
    trainer.train_on_batch(&click_batch(), &[1.0, 0.0, 0.0, 1.0]).unwrap();
    model = trainer.into_model();
    let expected = model.predict(&click_batch()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let checkpointers: Vec<Box<dyn Checkpointer>> =
        vec![Box::new(JsonCheckpointer::new()), Box::new(BinaryCheckpointer::new())];
    for checkpointer in &checkpointers {
        let path = model.save(checkpointer.as_ref(), dir.path(), 12).unwrap();
        assert_eq!(checkpointer.latest(dir.path()), Some(path.clone()));

        let restored = FGCNN::load(checkpointer.as_ref(), &path).unwrap();
        let actual = restored.predict(&click_batch()).unwrap();
        for (a, e) in actual.data().iter().zip(expected.data()) {
            approx::assert_relative_eq!(*a, *e, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_load_into_different_architecture_fails() {
    let model = build_fgcnn(&click_spec(), &small_config()).unwrap();
    let state = model.state_dict(0).unwrap();

    let mut other = build_fgcnn(&click_spec(), &small_config().with_embedding_size(5)).unwrap();
    let err = other.load_state_dict(&state).unwrap_err();
    assert!(matches!(err, FgcnnError::Checkpoint(_)));
}

#[test]
fn test_training_reduces_loss() {
    let spec = FeatureSpec::new()
        .with_sparse("f1", 4)
        .with_sparse("f2", 3)
        .with_sequence("hist", 5, 3, PoolingMode::Mean);
    let config = small_config().with_init_std(0.1).with_l2_reg_embedding(0.0);
    let model = build_fgcnn(&spec, &config).unwrap();
    let mut trainer = Trainer::new(
        model,
        &TrainerConfig::default().with_optimizer(OptimizerConfig::Adam {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }),
    )
    .unwrap();

    let batch = FeatureBatch::new(4)
        .with_sparse("f1", vec![0, 1, 2, 3])
        .with_sparse("f2", vec![0, 1, 2, 0])
        .with_sequence(
            "hist",
            SequenceInput::from_ragged(&[vec![1, 2], vec![3], vec![], vec![4, 4, 4, 4]], 3),
        );
    let labels = [1.0, 0.0, 1.0, 1.0];

    let initial = trainer.evaluate(&batch, &labels).unwrap();
    for _ in 0..30 {
        trainer.train_on_batch(&batch, &labels).unwrap();
    }
    let trained = trainer.evaluate(&batch, &labels).unwrap();
    assert!(trained < initial, "{trained} >= {initial}");
    assert_eq!(trainer.global_step(), 30);
}

#[test]
fn test_stages_past_single_field_generate_nothing() {
    let spec = FeatureSpec::new().with_sparse("only", 3);
    let model = build_fgcnn(&spec, &FgcnnConfig::default()).unwrap();
    assert_eq!(model.generated_len(), 0);
    let scores = model.predict(&FeatureBatch::new(2).with_sparse("only", vec![0, 2])).unwrap();
    assert_eq!(scores.shape(), &[2, 1]);
}
