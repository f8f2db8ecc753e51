//! Membership commands.

use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use concord::membership::{JoinOutcome, Membership, MembershipDriver, MembershipState};

use crate::Context;

fn open(ctx: &Context) -> Result<Membership> {
    let m = &ctx.config.membership;
    let store = ctx.config.store.open(ctx.id.as_str())?;
    let membership = Membership::open(store, &m.bucket, &m.key, ctx.id.clone())
        .with_context(|| format!("opening group {}/{}", m.bucket, m.key))?;
    Ok(membership.with_timing(m.timing()))
}

fn report(outcome: JoinOutcome, id: &str) -> Result<()> {
    match outcome {
        JoinOutcome::Joined => {
            println!("{id} joined");
            Ok(())
        }
        JoinOutcome::NotAcknowledged => bail!(
            "{id} was not acknowledged by every member in time.\n  To fix: make sure the other members are running 'concord run', then retry."
        ),
        JoinOutcome::Expired => bail!(
            "{id}'s join request expired before it completed.\n  To fix: retry; if it keeps expiring, raise membership.join_interval_ms."
        ),
    }
}

pub fn join(ctx: &Context) -> Result<()> {
    let mut m = open(ctx)?;
    let outcome = m.join()?;
    report(outcome, ctx.id.as_str())
}

pub fn part(ctx: &Context) -> Result<()> {
    let mut m = open(ctx)?;
    if !m.is_member() {
        println!("{} is not a member; recording part anyway", ctx.id);
    }
    m.part()?;
    println!("{} parted", ctx.id);
    Ok(())
}

pub fn run(ctx: &Context, duration_ms: Option<u64>) -> Result<()> {
    let (driver, outcome) = MembershipDriver::start(open(ctx)?)?;
    report(outcome, ctx.id.as_str())?;
    let interval = ctx.config.membership.timing().run_interval;

    match duration_ms {
        Some(ms) => {
            thread::sleep(Duration::from_millis(ms));
            let m = driver.leave()?;
            println!("{} parted; members seen last: {}", ctx.id, m.members().join(", "));
        }
        None => loop {
            thread::sleep(interval.max(Duration::from_secs(1)));
            let members = driver.with(|m| m.members())?;
            tracing::info!(members = %members.join(","), "membership");
        },
    }
    Ok(())
}

pub fn show(ctx: &Context, json: bool) -> Result<()> {
    let m = open(ctx)?;
    let state = m.state();
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else {
        print_state(state);
    }
    Ok(())
}

fn print_state(state: &MembershipState) {
    println!("members:");
    for (id, entry) in &state.members {
        println!("  {id} (since {})", entry.time);
    }
    if !state.joins.is_empty() {
        println!("joining:");
        for (id, entry) in &state.joins {
            let acks: Vec<&str> = entry.ack.iter().map(String::as_str).collect();
            println!("  {id} acked by [{}]", acks.join(", "));
        }
    }
    if !state.parts.is_empty() {
        println!("parting:");
        for (id, entry) in &state.parts {
            let acks: Vec<&str> = entry.ack.iter().map(String::as_str).collect();
            println!("  {id} acked by [{}]", acks.join(", "));
        }
    }
    if !state.free.is_empty() || !state.taken.is_empty() {
        println!("queue:");
        for item in state.free.keys() {
            println!("  {item} (free)");
        }
        for (item, claim) in &state.taken {
            println!("  {item} (taken by {})", claim.owner);
        }
    }
    println!("{}", if state.stable() { "stable" } else { "changing" });
}

pub fn offer(ctx: &Context, item: &str, payload: &str) -> Result<()> {
    let payload = serde_json::from_str(payload).context("payload must be JSON")?;
    let mut m = open(ctx)?;
    if m.offer(item, payload)? {
        println!("offered {item}");
    } else {
        println!("{item} is already taken");
    }
    Ok(())
}

pub fn claim(ctx: &Context, item: &str) -> Result<()> {
    let mut m = open(ctx)?;
    match m.claim(item)? {
        Some(payload) => {
            println!("{}", serde_json::to_string(&payload)?);
            Ok(())
        }
        None => bail!("{item} is not available to {}", ctx.id),
    }
}

pub fn finish(ctx: &Context, item: &str) -> Result<()> {
    let mut m = open(ctx)?;
    if !m.finish(item)? {
        bail!("{item} is not held by {}", ctx.id);
    }
    println!("finished {item}");
    Ok(())
}

pub fn release(ctx: &Context, item: &str) -> Result<()> {
    let mut m = open(ctx)?;
    if !m.release(item)? {
        bail!("{item} is not held by {}", ctx.id);
    }
    println!("released {item}");
    Ok(())
}
