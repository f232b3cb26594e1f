//! Queue-then-hold walkthrough against live services.
//!
//! ```text
//! SHOW_ID=S2 CALLER_ID=caller-1 CUSTOMER_EMAIL=ada@example.com \
//!     admission-demo VIP:2 GA:1
//! ```

use admission::client::{HttpQueueClient, HttpReservationClient};
use admission::flow::QueueEnvironment;
use admission::types::{CallerId, CallerInfo, Customer, SeatSelection, SectionId, ShowId};
use admission::{AdmissionGate, Config, HoldRequest};
use anyhow::{Context, bail};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::environment::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,admission=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    turnstile_runtime::metrics::register_metrics();

    let config = Config::from_env();
    info!(
        queue_url = %config.services.queue_url,
        reservation_url = %config.services.reservation_url,
        "Configuration loaded"
    );

    let show_id = ShowId::new(env::var("SHOW_ID").context("SHOW_ID is not set")?);
    let caller_id = CallerId::new(env::var("CALLER_ID").context("CALLER_ID is not set")?);
    let customer = Customer {
        email: env::var("CUSTOMER_EMAIL").unwrap_or_else(|_| "guest@example.com".to_string()),
        name: env::var("CUSTOMER_NAME").unwrap_or_else(|_| "Guest".to_string()),
    };
    let selection = parse_selection(env::args().skip(1))?;

    let grants = config.grant_store();
    let clock = Arc::new(SystemClock);
    let queue = HttpQueueClient::new(&config.services.queue_url, config.http_timeout())?;
    let reservations =
        HttpReservationClient::new(&config.services.reservation_url, config.http_timeout())?;

    let gate = AdmissionGate::new(
        QueueEnvironment::new(
            Arc::new(queue),
            grants,
            clock,
            config.flow_config(),
        ),
        config.outcome_timeout(),
    );
    let holds = gate
        .hold_orchestrator(Arc::new(reservations))
        .with_max_tickets(config.holds.max_tickets_per_event);

    let caller_info = CallerInfo {
        name: Some(customer.name.clone()),
        email: Some(customer.email.clone()),
    };
    let admission = match gate.admit(&show_id, &caller_id, Some(caller_info)).await {
        Ok(admission) => admission,
        Err(err) => {
            error!(error = %err, "Admission failed");
            println!("Could not get in: {err}. Next: {}", err.next_action());
            return Ok(());
        },
    };
    println!("Admitted: {admission:?}");

    let request = HoldRequest {
        show_id,
        selection,
        customer,
    };
    match holds.create_hold(&request, Some(&admission)).await {
        Ok(hold) => {
            println!(
                "Hold {} on {} seat(s), expires {} ({} min)",
                hold.hold_id,
                hold.seat_ids.len(),
                hold.expires_at,
                hold.ttl_minutes
            );
        },
        Err(err) => {
            error!(error = %err, kind = err.kind(), "Hold failed");
            println!("Could not hold seats: {err}. Next: {}", err.next_action());
        },
    }

    Ok(())
}

/// `section:quantity` arguments
fn parse_selection(args: impl Iterator<Item = String>) -> anyhow::Result<SeatSelection> {
    let mut sections = Vec::new();
    for arg in args {
        let Some((section, quantity)) = arg.rsplit_once(':') else {
            bail!("expected section:quantity, got {arg:?}");
        };
        let quantity: u32 = quantity
            .parse()
            .with_context(|| format!("invalid quantity in {arg:?}"))?;
        sections.push((SectionId::new(section), quantity));
    }
    if sections.is_empty() {
        bail!("usage: admission-demo SECTION:QTY [SECTION:QTY ...]");
    }
    Ok(SeatSelection::new(sections))
}
