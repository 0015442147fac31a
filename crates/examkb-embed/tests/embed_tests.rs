use examkb_core::config::{EmbeddingSettings, ProviderKind};
use examkb_core::traits::EmbeddingProvider;
use examkb_embed::{build_provider, FakeProvider, FAKE_DIM};

#[test]
fn fake_provider_shapes_and_determinism() {
    let settings = EmbeddingSettings { provider: ProviderKind::Fake, ..Default::default() };
    let provider = build_provider(&settings).expect("provider");
    assert_eq!(provider.name(), "fake");

    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = provider.embed(&texts).expect("embed");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), FAKE_DIM, "embedding dim is {FAKE_DIM}");

    // Norm approximately 1.0
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Deterministic for same input
    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn fake_provider_is_length_preserving_and_ordered() {
    let provider = FakeProvider::new(64);
    let texts: Vec<String> = (0..25).map(|i| format!("option {i}")).collect();
    let all = provider.embed(&texts).expect("embed all");
    assert_eq!(all.len(), texts.len());
    for (i, t) in texts.iter().enumerate() {
        let single = provider.embed(std::slice::from_ref(t)).expect("embed one");
        assert_eq!(single[0], all[i], "slot {i} matches its own input");
    }
}

#[test]
fn shared_tokens_are_closer_than_unrelated_text() {
    let provider = FakeProvider::new(256);
    let v = provider
        .embed(&["cache memory hierarchy".to_string(), "memory hierarchy levels".to_string(), "binary adder circuit".to_string()])
        .expect("embed");
    let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    assert!(dot(&v[0], &v[1]) > dot(&v[0], &v[2]));
}
