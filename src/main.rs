use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::{anyhow, Context as _};
use clap::{ArgAction, Parser};
use kube::Client;
use prometheus::{Encoder, TextEncoder};
use tracing::*;
use url::Url;

use pagerduty_operator::config::{
    parse_bool, parse_seconds, DeploymentMode, OperatorConfig, DEFAULT_OPERATOR_NAMESPACE,
    DEFAULT_PAGERDUTY_API_URL,
};
use pagerduty_operator::leader_election::LeaderElector;
use pagerduty_operator::{heartbeat, telemetry, HeartbeatMetrics, Metrics, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Address the liveness and readiness probes are served on
    #[arg(
        long = "health-probe-bind-address",
        env = "HEALTH_PROBE_BIND_ADDRESS",
        default_value = "0.0.0.0:8081"
    )]
    health_probe_bind_address: String,

    /// Only reconcile while holding the leader lease
    #[arg(
        long = "leader-elect",
        env = "LEADER_ELECT",
        value_parser = parse_bool,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    leader_elect: bool,

    /// Address Prometheus metrics are served on
    #[arg(
        long = "metrics-bind-address",
        env = "METRICS_BIND_ADDRESS",
        default_value = "0.0.0.0:8080"
    )]
    metrics_bind_address: String,

    /// Derive cluster ids the way restricted environments require
    #[arg(
        long = "fedramp",
        env = "FEDRAMP",
        value_parser = parse_bool,
        action = ArgAction::Set,
        default_value = "false"
    )]
    fedramp: bool,

    #[arg(
        long = "operator-namespace",
        env = "OPERATOR_NAMESPACE",
        default_value = DEFAULT_OPERATOR_NAMESPACE
    )]
    operator_namespace: String,

    #[arg(
        long = "pagerduty-api-url",
        env = "PAGERDUTY_API_URL",
        default_value = DEFAULT_PAGERDUTY_API_URL
    )]
    pagerduty_api_url: Url,

    /// Seconds between PagerDuty heartbeats
    #[arg(
        long = "heartbeat-interval",
        env = "HEARTBEAT_INTERVAL",
        value_parser = parse_seconds,
        default_value = "300"
    )]
    heartbeat_interval: Duration,

    /// Seconds a single reconcile may take
    #[arg(
        long = "reconcile-timeout",
        env = "RECONCILE_TIMEOUT",
        value_parser = parse_seconds,
        default_value = "60"
    )]
    reconcile_timeout: Duration,

    #[arg(long = "concurrency", env = "CONCURRENCY", default_value_t = 4)]
    concurrency: u16,
}

impl Arguments {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            operator_namespace: self.operator_namespace.clone(),
            deployment_mode: DeploymentMode::from_fedramp_flag(self.fedramp),
            pagerduty_api_url: self.pagerduty_api_url.clone(),
            heartbeat_interval: self.heartbeat_interval,
            reconcile_timeout: self.reconcile_timeout,
            concurrency: self.concurrency,
        }
    }
}

#[get("/metrics")]
async fn metrics_handler(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/healthz")]
async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn readyz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("ready")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

/// Run the controller and the heartbeat, under the leader lease when one is requested
async fn operate(
    client: Client,
    metrics: Metrics,
    heartbeat_metrics: HeartbeatMetrics,
    state: State,
    leader_elect: bool,
) -> anyhow::Result<()> {
    let guard = if leader_elect {
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .context("leader election needs POD_NAME or HOSTNAME to be set")?;
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &state.config.operator_namespace,
            &identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let config = state.config.clone();
    let controller = pagerduty_operator::run(client.clone(), metrics, state);
    let heartbeat = heartbeat::run(client, heartbeat_metrics, config);

    match guard {
        Some(mut guard) => {
            tokio::select! {
                _ = controller => {},
                _ = heartbeat => {},
                _ = guard.lost() => return Err(anyhow!("leader lease lost")),
            }
            if let Err(e) = guard.release().await {
                warn!("failed to release leader lease: {e}");
            }
        }
        None => {
            tokio::select! {
                _ = controller => {},
                _ = heartbeat => {},
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let args: Arguments = Arguments::parse();
    let config = args.operator_config();
    info!(
        namespace = %config.operator_namespace,
        fedramp = config.deployment_mode.is_fedramp(),
        "Starting pagerduty-operator"
    );

    let client = Client::try_default()
        .await
        .context("failed to create kube Client")?;

    // Shared controller state
    let state = State::new(config);
    let metrics = Metrics::default().register(&state.registry)?;
    let heartbeat_metrics = HeartbeatMetrics::default().register(&state.registry)?;

    // Start web servers
    let server_state = state.clone();
    let metrics_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .wrap(middleware::Logger::default().exclude("/metrics"))
            .service(index)
            .service(metrics_handler)
    })
    .bind(&args.metrics_bind_address)?
    .shutdown_timeout(5)
    .run();

    let probe_server = HttpServer::new(|| {
        App::new()
            .wrap(middleware::Logger::default().exclude("/healthz").exclude("/readyz"))
            .service(healthz)
            .service(readyz)
    })
    .bind(&args.health_probe_bind_address)?
    .shutdown_timeout(5)
    .run();

    let operator = operate(client, metrics, heartbeat_metrics, state, args.leader_elect);

    // All of them implement graceful shutdown, so poll until all are done
    let (operator, metrics_server, probe_server) =
        tokio::join!(operator, metrics_server, probe_server);
    operator?;
    metrics_server?;
    probe_server?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Arguments::try_parse_from(["pagerduty-operator"]).unwrap();
        assert!(!args.leader_elect);
        assert_eq!(args.metrics_bind_address, "0.0.0.0:8080");
        assert_eq!(args.health_probe_bind_address, "0.0.0.0:8081");

        let config = args.operator_config();
        assert_eq!(config.deployment_mode, DeploymentMode::Standard);
        assert_eq!(config.operator_namespace, "pagerduty-operator");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(300));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(60));
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn flags() {
        let args = Arguments::try_parse_from([
            "pagerduty-operator",
            "--leader-elect",
            "--fedramp",
            "TRUE",
            "--heartbeat-interval",
            "30",
            "--pagerduty-api-url",
            "http://localhost:9000",
        ])
        .unwrap();
        assert!(args.leader_elect);

        let config = args.operator_config();
        assert!(config.deployment_mode.is_fedramp());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.pagerduty_api_url.as_str(), "http://localhost:9000/");
    }

    #[test]
    fn malformed_fedramp_aborts() {
        assert!(Arguments::try_parse_from(["pagerduty-operator", "--fedramp", "maybe"]).is_err());
    }
}
