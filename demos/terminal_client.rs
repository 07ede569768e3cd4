use clap::Parser;
use loan_flow::{
    DecisionPolicy, FlowRunner, InMemoryRecordStore, InMemorySessionStorage, RngSource,
    ScreenView, SessionController, StepStatus, UserAction, render,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;

/// Walk through the loan chat funnel from a terminal
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Seed for the decision draw; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated underwriting time in milliseconds
    #[arg(long, default_value_t = 3000)]
    latency_ms: u64,

    /// Probability of an approval, between 0 and 1
    #[arg(long, default_value_t = 0.7)]
    approval_rate: f64,

    #[arg(long, default_value = "default-app-id")]
    app_id: String,
}

type Input = Lines<BufReader<Stdin>>;

fn print_view(view: &ScreenView) {
    println!();
    println!("── {} ──", view.screen);
    if let Some(title) = &view.title {
        println!("{title}");
    }
    for message in &view.messages {
        println!("  > {message}");
    }
    if view.busy {
        return;
    }
    for (n, control) in view.controls.iter().enumerate() {
        println!("  [{}] {}", n + 1, control.label);
    }
}

async fn prompt(input: &mut Input, text: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}

/// Fill the free-text part of an action from the matching input field
async fn complete_action(
    input: &mut Input,
    view: &ScreenView,
    action: &UserAction,
) -> anyhow::Result<Option<UserAction>> {
    let placeholder = |name: &str| {
        view.inputs
            .iter()
            .find(|field| field.name == name)
            .map(|field| format!("{}: ", field.placeholder))
            .unwrap_or_else(|| format!("{name}: "))
    };

    let action = match action {
        UserAction::SendOtp { .. } => match prompt(input, &placeholder("phone")).await? {
            Some(phone) => UserAction::SendOtp { phone },
            None => return Ok(None),
        },
        UserAction::VerifyOtp { .. } => match prompt(input, &placeholder("otp")).await? {
            Some(code) => UserAction::VerifyOtp { code },
            None => return Ok(None),
        },
        other => other.clone(),
    };
    Ok(Some(action))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();

    let random = match args.seed {
        Some(seed) => RngSource::seeded(seed),
        None => RngSource::from_entropy(),
    };
    let policy = DecisionPolicy::default()
        .with_approval_rate(args.approval_rate)
        .with_latency(Duration::from_millis(args.latency_ms));

    let records = Arc::new(InMemoryRecordStore::new());
    let controller = SessionController::builder()
        .app_id(args.app_id)
        .records(records.clone())
        .random_source(Box::new(random))
        .policy(policy)
        .build()?;
    let runner = FlowRunner::new(
        Arc::new(controller),
        Arc::new(InMemorySessionStorage::new()),
    );

    let opened = runner.open(None).await?;
    let session_id = opened.session.id.clone();
    info!(session_id = %session_id, user_id = ?opened.session.user_id, "Session ready");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut waiting = false;

    loop {
        let session = runner.load(&session_id).await?;
        let view = render(&session, runner.controller().translations());
        if !(waiting && view.busy) {
            print_view(&view);
        }

        match StepStatus::of(&session) {
            StepStatus::Processing => {
                waiting = true;
                tokio::time::sleep(Duration::from_millis(250)).await;
                continue;
            }
            StepStatus::Completed if view.controls.is_empty() => break,
            _ => waiting = false,
        }

        let Some(choice) = prompt(&mut input, "choose (q to quit): ").await? else {
            break;
        };
        if choice.eq_ignore_ascii_case("q") {
            break;
        }

        let Some(control) = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| view.controls.get(index))
        else {
            println!("Pick one of the numbered options.");
            continue;
        };

        let Some(action) = complete_action(&mut input, &view, &control.action).await? else {
            break;
        };

        let result = runner.submit(&session_id, &action).await?;
        if result.status == StepStatus::Ignored {
            println!("(nothing happens)");
        }
    }

    println!();
    println!("Session {session_id} ended with {} stored documents.", records.len());
    Ok(())
}
