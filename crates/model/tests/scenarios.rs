//! End-to-end behaviour of composition and alignment on a three-word vocabulary.

use rootalign_diff::{Backend, Cpu, RTensor};
use rootalign_model::{AlignConfig, AlignmentHead, ModelError, RecursiveComposer, RootAlign};
use rootalign_nlp::{EmbeddingTable, NlpError, RawNode, TreeNode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CAT: usize = 1;
const SAT: usize = 2;

fn table() -> EmbeddingTable {
    EmbeddingTable::from_rows(&[
        ("<OOV>", vec![0.0, 0.0, 0.0]),
        ("cat", vec![0.5, -0.3, 0.8]),
        ("sat", vec![-0.2, 0.7, 0.1]),
    ])
    .unwrap()
}

fn config() -> AlignConfig {
    AlignConfig {
        hidden_dim: 2,
        relation_num: 3,
        seed: 3,
        ..AlignConfig::default()
    }
}

/// Counts every kernel call that reaches the backend.
#[derive(Debug, Clone, Default)]
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl Counting {
    fn tick(&self) -> Cpu {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Cpu
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }
    fn affine(&self, x: &RTensor, weight: &RTensor, bias: &RTensor) -> RTensor {
        self.tick().affine(x, weight, bias)
    }
    fn concat(&self, a: &RTensor, b: &RTensor) -> RTensor {
        self.tick().concat(a, b)
    }
    fn sigmoid(&self, x: &RTensor) -> RTensor {
        self.tick().sigmoid(x)
    }
    fn tanh(&self, x: &RTensor) -> RTensor {
        self.tick().tanh(x)
    }
    fn softmax(&self, x: &RTensor) -> RTensor {
        self.tick().softmax(x)
    }
    fn gather_row(&self, table: &RTensor, index: usize) -> RTensor {
        self.tick().gather_row(table, index)
    }
}

fn assert_distribution(p: &RTensor, r: usize) {
    assert_eq!(p.shape, vec![1, r]);
    assert!(p.data.iter().all(|&x| x >= 0.0), "{:?}", p);
    assert!((p.data.iter().sum::<f32>() - 1.0).abs() < 1e-5, "{:?}", p);
}

#[test]
fn single_leaf_root_is_leaf_projection() {
    let model = RootAlign::new(table(), &config()).unwrap();
    let c = model.compose(&TreeNode::leaf(CAT)).unwrap();

    let embedding = model.embeddings().lookup(CAT).unwrap();
    let projected = model.composer().word2hidden().forward(&Cpu, &embedding);
    assert_eq!(c.len(), 1);
    assert_eq!(c.root(), &projected);
    assert_eq!(c.root().shape, vec![1, 2]);
}

#[test]
fn single_leaf_never_merges() {
    let backend = Counting::default();
    let model = RootAlign::with_backend(table(), &config(), backend.clone()).unwrap();
    model.compose(&TreeNode::leaf(SAT)).unwrap();
    // gather_row + affine, no concat
    assert_eq!(backend.calls(), 2);
}

#[test]
fn internal_root_merges_leaf_projections() {
    let model = RootAlign::new(table(), &config()).unwrap();
    let tree = TreeNode::internal(TreeNode::leaf(CAT), TreeNode::leaf(SAT));
    let c = model.compose(&tree).unwrap();

    let composer = model.composer();
    let cat = composer.project_leaf(&model.embeddings().lookup(CAT).unwrap());
    let sat = composer.project_leaf(&model.embeddings().lookup(SAT).unwrap());
    let expected = composer.merge(&cat, &sat);

    assert_eq!(c.root().shape, vec![1, 2]);
    assert_eq!(c.root(), &expected);
    assert_ne!(c.root(), &cat);
    assert_ne!(c.root(), &sat);
}

#[test]
fn composition_is_deterministic() {
    let model = RootAlign::new(table(), &config()).unwrap();
    let tree = TreeNode::internal(
        TreeNode::internal(TreeNode::leaf(CAT), TreeNode::leaf(SAT)),
        TreeNode::internal(TreeNode::leaf(SAT), TreeNode::leaf(CAT)),
    );
    let first = model.compose(&tree).unwrap();
    let second = model.compose(&tree).unwrap();
    assert_eq!(first, second);

    // Each internal node depends on its children only: the two inner
    // subtrees differ in order, so their vectors differ too.
    assert_ne!(first.get(2), first.get(5));
}

#[test]
fn recompute_after_parameter_change() {
    let mut model = RootAlign::new(table(), &config()).unwrap();
    let tree = TreeNode::leaf(CAT);
    let before = model.compose(&tree).unwrap().into_root();

    model.embeddings_mut().row_mut(CAT).unwrap()[0] += 1.0;
    let after = model.compose(&tree).unwrap().into_root();
    assert_ne!(before, after);
}

#[test]
fn align_output_is_distribution() {
    let head = AlignmentHead::new(2, 3, 11);
    let v1 = RTensor::row(vec![0.1, 0.2]);
    let v2 = RTensor::row(vec![0.3, -0.1]);

    let forward = head.align(&v1, &v2).unwrap();
    let swapped = head.align(&v2, &v1).unwrap();
    assert_distribution(&forward, 3);
    assert_distribution(&swapped, 3);
    assert!(!forward.approx_eq(&swapped, 1e-7));
}

#[test]
fn model_forward_two_phase() {
    let model = RootAlign::new(table(), &config()).unwrap();
    let p = TreeNode::internal(TreeNode::leaf(CAT), TreeNode::leaf(SAT));
    let h = TreeNode::leaf(0);

    let out = model.forward(&p, &h).unwrap();
    assert_distribution(&out.probabilities, 3);
    assert_eq!(out.premise.len(), 3);
    assert_eq!(out.hypothesis.len(), 1);

    let direct = model
        .head()
        .align(out.premise.root(), out.hypothesis.root())
        .unwrap();
    assert_eq!(direct, out.probabilities);
    assert_eq!(model.predict(&p, &h).unwrap(), out.label());
}

#[test]
fn malformed_trees_are_rejected() {
    for n in [1usize, 3] {
        let raw = RawNode::internal((0..n).map(|_| RawNode::leaf(CAT)).collect());
        let err = TreeNode::try_from(raw).unwrap_err();
        assert!(matches!(err, NlpError::MalformedTree { .. }), "{} children", n);
    }

    let nested = RawNode::internal(vec![
        RawNode::leaf(CAT),
        RawNode::internal(vec![RawNode::leaf(SAT)]),
    ]);
    assert!(matches!(
        TreeNode::try_from(nested),
        Err(NlpError::MalformedTree { .. })
    ));
    assert_eq!(TreeNode::from_raw(None), Err(NlpError::EmptyTree));
}

#[test]
fn out_of_range_index_fails_before_any_compute() {
    let backend = Counting::default();
    let model = RootAlign::with_backend(table(), &config(), backend.clone()).unwrap();

    // The bad leaf is last in post-order, after two valid leaves.
    let tree = TreeNode::internal(
        TreeNode::internal(TreeNode::leaf(CAT), TreeNode::leaf(SAT)),
        TreeNode::leaf(3),
    );
    let err = model.compose(&tree).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Nlp(NlpError::IndexOutOfRange {
            index: 3,
            vocab_size: 3
        })
    ));
    assert_eq!(backend.calls(), 0);

    let err = model.forward(&TreeNode::leaf(CAT), &tree).unwrap_err();
    assert!(matches!(err, ModelError::Nlp(NlpError::IndexOutOfRange { .. })));
}

#[test]
fn composer_from_layers_on_custom_backend() {
    let backend = Counting::default();
    let base = RecursiveComposer::new(3, 2, 9);
    let composer = RecursiveComposer::from_layers(
        backend.clone(),
        base.word2hidden().clone(),
        base.hidden2hidden().clone(),
        base.leaf_activation(),
    )
    .unwrap();

    let tree = TreeNode::internal(TreeNode::leaf(CAT), TreeNode::leaf(SAT));
    let counted = composer.compose(&table(), &tree).unwrap();
    let plain = base.compose(&table(), &tree).unwrap();
    assert_eq!(counted, plain);
    // 2 × (gather_row + affine) + concat + affine
    assert_eq!(backend.calls(), 6);
}
