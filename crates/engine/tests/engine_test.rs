//! End-to-end tests for the recommendation engine.
//!
//! Exercises the full train → serve → evaluate cycle through the public
//! API, including cold-start routing, hot swap, and artifact round-trips.

use std::sync::Arc;
use std::thread;

use media_recommender_engine::{
    BlendConfig, EngineConfig, EvaluationConfig, Evaluator, FactorizationConfig, ItemMetadata,
    MinVotes, ModelState, PopularityConfig, Rating, RecommenderEngine, RecommendationSource,
    RecommenderError, SplitStrategy,
};

fn engine_config() -> EngineConfig {
    EngineConfig {
        factorization: FactorizationConfig {
            rank: 4,
            max_iterations: 300,
            convergence_tolerance: 1e-3,
            random_seed: 17,
            ..Default::default()
        },
        blend: BlendConfig {
            cold_start_threshold: 3,
            ..Default::default()
        },
        popularity: PopularityConfig {
            min_votes: MinVotes::Fixed(2),
        },
        ..Default::default()
    }
}

/// Two taste clusters: thriller fans and comedy fans, plus one item nobody
/// has rated yet.
fn ratings() -> Vec<Rating> {
    let mut out = Vec::new();
    for u in 0..5 {
        out.push(Rating::new(format!("t{u}"), "thr1", 5.0, 1));
        out.push(Rating::new(format!("t{u}"), "thr2", 4.5, 2));
        out.push(Rating::new(format!("t{u}"), "com1", 1.5, 3));
        out.push(Rating::new(format!("t{u}"), "com2", 2.0, 4));

        out.push(Rating::new(format!("c{u}"), "com1", 5.0, 1));
        out.push(Rating::new(format!("c{u}"), "com2", 4.5, 2));
        out.push(Rating::new(format!("c{u}"), "thr1", 2.0, 3));
        out.push(Rating::new(format!("c{u}"), "thr2", 1.5, 4));
    }
    // An item only the comedy fans rated, so thriller fans keep an unrated
    // in-index candidate.
    for u in 0..5 {
        out.push(Rating::new(format!("c{u}"), "com3", 4.0, 5));
    }
    out
}

fn catalog() -> Vec<ItemMetadata> {
    vec![
        ItemMetadata::new("thr1", vec!["thriller".into(), "crime".into()]),
        ItemMetadata::new("thr2", vec!["thriller".into(), "crime".into()]),
        ItemMetadata::new("com1", vec!["comedy".into()]),
        ItemMetadata::new("com2", vec!["comedy".into(), "family".into()]),
        ItemMetadata::new("com3", vec!["comedy".into()]),
        ItemMetadata::new("thr_new", vec!["thriller".into(), "crime".into()]),
    ]
}

#[test]
fn full_cycle_trains_and_serves() {
    let engine = RecommenderEngine::new(engine_config());
    engine.set_catalog(catalog());

    let meta = engine.train(&ratings()).unwrap();
    assert_eq!(engine.state(), ModelState::Trained);
    assert_eq!(meta.n_users, 10);
    assert_eq!(meta.n_items, 5);

    // A thriller fan's prediction for an unrated comedy stays low.
    let p_com3 = engine.predict("t0", "com3").unwrap();
    let p_thr1 = engine.predict("t0", "thr1").unwrap();
    assert!(p_thr1 > p_com3);

    let recs = engine.recommend("t0", 5).unwrap();
    assert!(!recs.is_empty());
    assert!(recs.iter().all(|r| r.rank >= 1));
    // Never recommend something the user already rated.
    for rec in &recs {
        for rated in ["thr1", "thr2", "com1", "com2"] {
            assert_ne!(rec.item_id, rated);
        }
    }
}

#[test]
fn cold_start_user_gets_popularity_list() {
    let engine = RecommenderEngine::new(engine_config());
    engine.train(&ratings()).unwrap();

    let recs = engine.recommend("brand_new_user", 4).unwrap();
    assert_eq!(recs.len(), 4);
    assert!(recs
        .iter()
        .all(|r| r.source == RecommendationSource::Popularity));

    // Ranks are contiguous from 1 and scores are non-increasing.
    for (position, rec) in recs.iter().enumerate() {
        assert_eq!(rec.rank, position + 1);
    }
    for pair in recs.windows(2) {
        assert!(pair[0].predicted_score >= pair[1].predicted_score);
    }
}

#[test]
fn unrated_catalog_item_surfaces_through_content() {
    let engine = RecommenderEngine::new(engine_config());
    engine.set_catalog(catalog());
    engine.train(&ratings()).unwrap();

    // thr_new has no ratings; thriller fans should still see it, scored by
    // content similarity to their top-rated items.
    let recs = engine.recommend("t1", 10).unwrap();
    let cold = recs.iter().find(|r| r.item_id == "thr_new");
    assert!(cold.is_some());
    assert_eq!(cold.unwrap().source, RecommendationSource::Content);
}

#[test]
fn recommend_is_idempotent_between_trainings() {
    let engine = RecommenderEngine::new(engine_config());
    engine.set_catalog(catalog());
    engine.train(&ratings()).unwrap();

    let first = engine.recommend("c2", 5).unwrap();
    let second = engine.recommend("c2", 5).unwrap();
    assert_eq!(first, second);
}

#[test]
fn predictions_are_reproducible_across_engines() {
    let a = RecommenderEngine::new(engine_config());
    let b = RecommenderEngine::new(engine_config());
    a.train(&ratings()).unwrap();
    b.train(&ratings()).unwrap();

    for user in ["t0", "c3"] {
        for item in ["thr1", "com2", "com3"] {
            assert_eq!(a.predict(user, item).unwrap(), b.predict(user, item).unwrap());
        }
    }
}

#[test]
fn concurrent_reads_survive_a_hot_swap() {
    let engine = Arc::new(RecommenderEngine::new(engine_config()));
    engine.train(&ratings()).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    let score = engine.predict("t0", "com3").unwrap();
                    assert!((0.5..=5.0).contains(&score));
                }
            })
        })
        .collect();

    // Retrain while readers are in flight; they must only ever observe a
    // complete artifact.
    engine.train(&ratings()).unwrap();

    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn untrained_engine_is_typed_not_panicking() {
    let engine = RecommenderEngine::with_default_config();
    assert!(matches!(
        engine.recommend("anyone", 5),
        Err(RecommenderError::ModelNotReady)
    ));
}

#[test]
fn artifact_round_trip_between_engines() {
    let source = RecommenderEngine::new(engine_config());
    source.set_catalog(catalog());
    source.train(&ratings()).unwrap();

    let bytes = source.export_artifact().unwrap();
    let target = RecommenderEngine::new(engine_config());
    target.import_artifact(&bytes).unwrap();

    assert_eq!(
        source.recommend("t0", 5).unwrap(),
        target.recommend("t0", 5).unwrap()
    );
}

#[test]
fn evaluator_runs_offline_over_the_same_table() {
    let config = EvaluationConfig {
        strategy: SplitStrategy::Holdout { test_fraction: 0.25 },
        factorization: FactorizationConfig {
            rank: 3,
            max_iterations: 300,
            convergence_tolerance: 1e-2,
            ..Default::default()
        },
        ..Default::default()
    };
    let report = Evaluator::new(config)
        .evaluate(&ratings(), &catalog())
        .unwrap();

    assert_eq!(report.folds.len(), 1);
    assert!(report.aggregate.rmse.mean.is_finite());
    assert!(report.aggregate.mae.mean.is_finite());

    // Reports serialize for operator tooling.
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("rmse"));
}
