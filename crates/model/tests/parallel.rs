//! Concurrent scoring against one shared model.

use rootalign_model::{AlignConfig, ModelError, ParallelScorer, RootAlign};
use rootalign_nlp::{EmbeddingTable, NlpError, TreeNode};
use std::sync::Arc;

fn model() -> Arc<RootAlign> {
    let table = EmbeddingTable::from_rows(&[
        ("<OOV>", vec![0.0, 0.0]),
        ("a", vec![0.9, -0.1]),
        ("b", vec![-0.5, 0.4]),
        ("c", vec![0.3, 0.3]),
    ])
    .unwrap();
    let config = AlignConfig {
        hidden_dim: 3,
        relation_num: 4,
        ..AlignConfig::default()
    };
    Arc::new(RootAlign::new(table, &config).unwrap())
}

fn pairs() -> Vec<(TreeNode, TreeNode)> {
    let mut out = Vec::new();
    for i in 1..4 {
        for j in 1..4 {
            let p = TreeNode::internal(TreeNode::leaf(i), TreeNode::leaf(j));
            out.push((p, TreeNode::leaf(j)));
        }
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_scores_match_sequential_order() {
    let model = model();
    let scorer = ParallelScorer::new(Arc::clone(&model)).with_workers(4);
    let input = pairs();

    let scores = scorer.score_pairs(input.clone()).await.unwrap();
    assert_eq!(scores.len(), input.len());
    for ((p, h), score) in input.iter().zip(&scores) {
        assert_eq!(&model.forward(p, h).unwrap().probabilities, score);
    }

    let labels = scorer.predict_pairs(input.clone()).await.unwrap();
    for ((p, h), label) in input.iter().zip(labels) {
        assert_eq!(model.predict(p, h).unwrap(), label);
    }
}

#[tokio::test]
async fn empty_batch() {
    let scorer = ParallelScorer::new(model());
    assert!(scorer.score_pairs(Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_pair_fails_the_batch() {
    let scorer = ParallelScorer::new(model()).with_workers(3);
    let mut input = pairs();
    input.push((TreeNode::leaf(42), TreeNode::leaf(1)));

    let err = scorer.score_pairs(input).await.unwrap_err();
    assert!(matches!(
        err,
        ModelError::Nlp(NlpError::IndexOutOfRange { index: 42, .. })
    ));
}
