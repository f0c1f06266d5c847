//! modelgate 演示入口
//!
//! 每个命令行参数作为一次用户查询并发提交给 Mock Agent，打印归一化后的回复。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::join_all;
use modelgate::{
    agent::{AgentArgs, AgentCallable, MockAgent},
    config::load_config,
    core::{AdmissionConfig, AdmissionController, Priority},
    observability,
    response::{FallbackSettings, MoodContext, ResponseNormalizer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let admission = AdmissionConfig::from(&cfg.admission);
    let normalizer = ResponseNormalizer::with_settings(FallbackSettings::from(&cfg.fallback));
    let controller = AdmissionController::with_normalizer(admission, normalizer);
    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("modelgate"),
        max_concurrent = controller.config().max_concurrent,
        queue_capacity = controller.config().queue_capacity,
        "controller ready"
    );

    let mut queries: Vec<String> = std::env::args().skip(1).collect();
    if queries.is_empty() {
        queries = vec![
            "Hello!".to_string(),
            "What is the capital of France?".to_string(),
            "Summarize today's notes".to_string(),
        ];
    }

    let agent: Arc<dyn AgentCallable> = Arc::new(MockAgent::new(Duration::from_millis(300)));
    let timeout = controller.config().default_timeout;
    let mood = MoodContext::default();

    let replies = join_all(queries.iter().enumerate().map(|(i, query)| {
        let controller = controller.clone();
        let agent = Arc::clone(&agent);
        let mood = mood.clone();
        let query = query.clone();
        async move {
            let priority = if i == 0 {
                Priority::SystemCritical
            } else {
                Priority::UserConversation
            };
            let reply = controller
                .respond(agent, priority, format!("cli-{i}"), timeout, AgentArgs::new(query.clone()), &mood)
                .await;
            (query, reply)
        }
    }))
    .await;

    for (query, reply) in replies {
        println!("> {query}\n{reply}\n");
    }

    let stats = controller.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?
    );
    controller.shutdown();
    Ok(())
}
