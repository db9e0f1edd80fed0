//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `spnet_core` linkage and print the crate version.
//! - Run the two-topic merge and fan-out walkthrough against an in-memory
//!   database and print the outcome.
//!
//! Environment:
//! - `SPNET_CONFIG`: optional TOML file with `merge_threshold`.
//! - `SPNET_LOG_DIR`: optional absolute directory for rolling logs.

use log::info;
use spnet_core::model::reference::{Paper, PaperSource};
use spnet_core::repo::merge_repo::SqliteMergeRepository;
use spnet_core::repo::recommendation_repo::SqliteRecommendationRepository;
use spnet_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use spnet_core::repo::subscription_repo::SqliteSubscriptionRepository;
use spnet_core::repo::topic_repo::SqliteTopicRepository;
use spnet_core::{
    default_log_level, init_logging, open_db_in_memory, CoreConfig, MergeResolver, MergeService,
    NewRecommendation, Priority, RecommendationRouter, RecommendationService,
    SubscriptionService, TopicService,
};
use std::collections::BTreeSet;
use std::error::Error;
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    println!("spnet_core ping={}", spnet_core::ping());
    println!("spnet_core version={}", spnet_core::core_version());

    match run_demo() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("SPNET_LOG_DIR") {
        init_logging(default_log_level(), log_dir)?;
    }
    let config = match std::env::var("SPNET_CONFIG") {
        Ok(path) => CoreConfig::load(path)?,
        Err(_) => CoreConfig::default(),
    };
    println!("merge_threshold={}", config.merge_threshold.value());

    let conn = open_db_in_memory()?;
    let (recommender, u1, u2, lurker) = (
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    );

    let topics = TopicService::new(SqliteTopicRepository::try_new(&conn)?);
    let ml = topics.create_topic("ML", "Machine learning", u1)?;
    let dl = topics.create_topic("Deep Learning", "Neural networks", u2)?;
    topics.join_topic(dl, u1)?;
    topics.join_topic(dl, u2)?;
    topics.join_topic(ml, u2)?;

    MergeService::new(SqliteMergeRepository::try_new(&conn)?)
        .propose_merge(u1, dl, ml, false)?;
    let resolver = MergeResolver::new(
        SqliteMergeRepository::try_new(&conn)?,
        config.merge_threshold,
    );
    println!(
        "canonicalize(DL, U1)={} canonicalize(DL, U2)={}",
        label(resolver.canonicalize(dl, u1)?, ml, dl),
        label(resolver.canonicalize(dl, u2)?, ml, dl)
    );

    let subscriptions = SubscriptionService::new(SqliteSubscriptionRepository::try_new(&conn)?);
    subscriptions.upsert_subscription(lurker, recommender, Priority::Low, true)?;
    subscriptions.upsert_subscription(u2, recommender, Priority::High, false)?;

    let reference = SqliteReferenceRepository::try_new(&conn)?;
    let source = reference.create_paper_source(&PaperSource {
        id: Uuid::new_v4(),
        name: "arXiv".to_string(),
        url_template: "https://arxiv.org/abs/{id}".to_string(),
        description: String::new(),
    })?;
    let paper = reference.create_paper(&Paper {
        id: Uuid::new_v4(),
        source,
        external_id: "1706.03762".to_string(),
        url_data: String::new(),
        title: "Attention Is All You Need".to_string(),
        topics: BTreeSet::from([ml]),
        submitter: recommender,
    })?;

    let router =
        RecommendationRouter::new(resolver, SqliteSubscriptionRepository::try_new(&conn)?);
    let recommendations =
        RecommendationService::new(SqliteRecommendationRepository::try_new(&conn)?, router);
    let rec = recommendations.create_recommendation(
        NewRecommendation::new(recommender, paper)
            .with_topics([ml])
            .must_read(true),
    )?;
    for recipient in recommendations.route_detailed(rec)? {
        println!(
            "recipient priority={} must_read={} matched_by={:?}",
            recipient.priority.as_str(),
            recipient.must_read,
            recipient.matched_by
        );
    }
    info!("event=cli_demo module=cli status=ok");
    Ok(())
}

fn label(topic: Uuid, ml: Uuid, dl: Uuid) -> &'static str {
    if topic == ml {
        "ML"
    } else if topic == dl {
        "DL"
    } else {
        "?"
    }
}
