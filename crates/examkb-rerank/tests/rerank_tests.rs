use examkb_core::config::{RerankBackend, RerankSettings};
use examkb_core::error::Error;
use examkb_rerank::{build_reranker, spawn_reranker, yes_probability};

fn keyword_settings() -> RerankSettings {
    RerankSettings { backend: RerankBackend::Keyword, ..Default::default() }
}

#[test]
fn keyword_backend_scores_in_unit_range() {
    let reranker = build_reranker(&keyword_settings()).expect("keyword reranker");
    assert_eq!(reranker.strategy(), "keyword-overlap");
    let docs = vec![
        "题目：寄存器位于哪里 选项A：CPU内部".to_string(),
        "题目：寄存器位于哪里 选项B：内存".to_string(),
        "unrelated".to_string(),
    ];
    let scores = reranker.score("CPU 内部", &docs).expect("score");
    assert_eq!(scores.len(), docs.len());
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!(scores[0] > scores[1] && scores[1] > scores[2]);
}

#[test]
fn missing_model_is_reported_not_panicked() {
    let settings = RerankSettings { model_dir: Some("/definitely/not/here".into()), ..Default::default() };
    std::env::remove_var("APP_RERANKER_DIR");
    // falls through to ./models/qwen3-reranker, which is absent in the test tree
    assert!(matches!(build_reranker(&settings), Err(Error::Rerank(_))));

    let background = spawn_reranker(&settings);
    let err = background.score("q", &["d".to_string()]).unwrap_err();
    assert!(matches!(err, Error::RerankerNotReady | Error::Rerank(_)));
}

#[test]
fn softmax_matches_reference_values() {
    // softmax([2, 0])[0] = 1 / (1 + e^-2)
    assert!((yes_probability(2.0, 0.0) - 0.880_797).abs() < 1e-5);
    assert!((yes_probability(0.0, 2.0) - 0.119_203).abs() < 1e-5);
}
