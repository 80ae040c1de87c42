//! Root alignment on a toy entailment set
//!
//! Run with: RUST_LOG=rootalign_model=info cargo run -p rootalign-model --example root_align
//!
//! Walks through:
//! - building a vocabulary and embedding table from word counts
//! - parsing binary trees from JSON
//! - composing a tree bottom-up
//! - training, checkpointing and batch scoring

use rootalign_model::{AlignConfig, Example, ParallelScorer, RootAlign, Trainer};
use rootalign_nlp::{count_words, is_stop_word, EmbeddingTable, RawNode, TreeNode, Vocabulary};
use std::error::Error;
use std::sync::Arc;

const RELATIONS: [&str; 3] = ["entailment", "neutral", "contradiction"];

fn parse(json: &str) -> Result<TreeNode, Box<dyn Error + Send + Sync>> {
    let raw: RawNode = serde_json::from_str(json)?;
    Ok(TreeNode::try_from(raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rootalign_model=info".parse()?),
        )
        .init();

    println!("=== Root Alignment ===\n");

    // -------------------------------------------------------------------------
    // 1. Vocabulary and embeddings
    // -------------------------------------------------------------------------
    println!("1. Vocabulary and embeddings");
    println!("----------------------------");

    let corpus = ["a dog runs", "a cat sleeps", "the dog sleeps", "the cat runs"];
    let counts = count_words(corpus.iter().flat_map(|s| s.split_whitespace()));
    let mut words: Vec<&str> = counts
        .keys()
        .map(String::as_str)
        .filter(|w| !is_stop_word(w))
        .collect();
    words.sort_unstable();

    let vocab: Vocabulary = std::iter::once("<OOV>").chain(words).collect();
    let table = EmbeddingTable::random(vocab, 8, 7);
    println!("{} words, dim {}", table.vocab_size(), table.dim());
    for (i, w) in table.vocab().iter().enumerate() {
        println!("  {:>2} {}", i, w);
    }
    println!();

    let id = |w: &str| table.vocab().get_index(w).unwrap_or(0);
    let (dog, cat, runs, sleeps) = (id("dog"), id("cat"), id("runs"), id("sleeps"));

    // -------------------------------------------------------------------------
    // 2. Trees
    // -------------------------------------------------------------------------
    println!("2. Trees");
    println!("--------");

    let json = format!(
        r#"{{ "children": [ {{ "word_index": {} }}, {{ "word_index": {} }} ] }}"#,
        dog, runs
    );
    let dog_runs = parse(&json)?;
    println!("parsed {} (size {}, depth {})", dog_runs, dog_runs.size(), dog_runs.depth());

    match parse(r#"{ "children": [ { "word_index": 1 } ] }"#) {
        Ok(tree) => println!("unexpected tree {}", tree),
        Err(e) => println!("unary node rejected: {}", e),
    }
    println!();

    // -------------------------------------------------------------------------
    // 3. Composition
    // -------------------------------------------------------------------------
    println!("3. Composition");
    println!("--------------");

    let config = AlignConfig {
        hidden_dim: 6,
        relation_num: RELATIONS.len(),
        learning_rate: 0.2,
        epochs: 40,
        max_grad: Some(5.0),
        ..AlignConfig::default()
    };
    let mut model = RootAlign::new(table, &config)?;

    let composition = model.compose(&dog_runs)?;
    for (i, v) in composition.iter().enumerate() {
        println!("  node {}: {:?}", i, v.data);
    }
    println!();

    // -------------------------------------------------------------------------
    // 4. Training
    // -------------------------------------------------------------------------
    println!("4. Training");
    println!("-----------");

    let phrase = |n, v| TreeNode::internal(TreeNode::leaf(n), TreeNode::leaf(v));
    let data = vec![
        Example::new(phrase(dog, runs), TreeNode::leaf(dog), 0),
        Example::new(phrase(cat, sleeps), TreeNode::leaf(cat), 0),
        Example::new(phrase(dog, runs), TreeNode::leaf(cat), 1),
        Example::new(phrase(cat, sleeps), TreeNode::leaf(dog), 1),
        Example::new(phrase(dog, runs), phrase(dog, sleeps), 2),
        Example::new(phrase(cat, sleeps), phrase(cat, runs), 2),
    ];

    let mut trainer = Trainer::new(config)?;
    let losses = trainer.fit(&mut model, &data)?;
    if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
        println!("loss {:.4} -> {:.4}", first, last);
    }
    println!("train accuracy {:.2}", trainer.evaluate(&model, &data)?);
    println!();

    // -------------------------------------------------------------------------
    // 5. Checkpoint and batch scoring
    // -------------------------------------------------------------------------
    println!("5. Checkpoint and batch scoring");
    println!("-------------------------------");

    let path = std::env::temp_dir().join("root_align_demo.json");
    model.save_parameters(&path)?;
    println!("saved {} parameters to {}", model.parameters().num_parameters(), path.display());

    let scorer = ParallelScorer::new(Arc::new(model)).with_workers(2);
    let pairs: Vec<_> = data
        .iter()
        .map(|ex| (ex.premise.clone(), ex.hypothesis.clone()))
        .collect();
    let scores = scorer.score_pairs(pairs).await?;
    for (ex, p) in data.iter().zip(&scores) {
        println!(
            "  {} / {} -> {} {:?}",
            ex.premise,
            ex.hypothesis,
            RELATIONS[p.argmax()],
            p.data
        );
    }

    Ok(())
}
