//! In-process group simulation.
//!
//! Spins up N participants on one in-memory store, each on its own thread
//! with its own client id, lets them join concurrently, and reports how
//! long the group took to converge. Then every participant leaves.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use clap::Args;
use concord::Timing;
use concord::membership::{JoinOutcome, Membership, MembershipDriver, ParticipantId};
use concord_store::{MemoryStore, ObjectStore};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of participants
    #[arg(long, short = 'n', default_value_t = 4)]
    participants: usize,

    /// Join interval in milliseconds
    #[arg(long, default_value_t = 200)]
    join_ms: u64,

    /// Loop interval in milliseconds
    #[arg(long, default_value_t = 20)]
    run_ms: u64,

    /// Give up waiting for convergence after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    if args.participants == 0 {
        bail!("--participants must be at least 1");
    }
    let timing = Timing {
        join_interval: Duration::from_millis(args.join_ms),
        part_interval: Duration::from_millis(args.join_ms),
        run_interval: Duration::from_millis(args.run_ms),
    };
    let store = MemoryStore::new();
    let ids: Vec<String> = (0..args.participants).map(|i| format!("sim-{i}")).collect();

    let started = Instant::now();
    let joiners: Vec<_> = ids
        .iter()
        .map(|id| -> Result<_> {
            let handle: Arc<dyn ObjectStore> = Arc::new(store.with_client_id(id)?);
            let id = ParticipantId::new(id)?;
            let membership =
                Membership::open(handle, "membership", "simulation", id)?.with_timing(timing);
            Ok(thread::spawn(move || MembershipDriver::start(membership)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut drivers = Vec::with_capacity(joiners.len());
    for (id, joiner) in ids.iter().zip(joiners) {
        let (driver, mut outcome) = joiner
            .join()
            .map_err(|_| anyhow!("participant thread for {id} panicked"))??;
        let mut attempts = 1;
        while outcome != JoinOutcome::Joined && attempts < 5 {
            outcome = driver.join()?;
            attempts += 1;
        }
        println!("{id}: {outcome:?} after {attempts} attempt(s)");
        drivers.push(driver);
    }

    // `members()` is sorted, and `sim-10` sorts before `sim-2`.
    let mut expected = ids.clone();
    expected.sort();

    let deadline = started + Duration::from_millis(args.timeout_ms);
    let converged = loop {
        let views = drivers
            .iter()
            .map(|d| d.with(|m| (m.members(), m.stable())))
            .collect::<Result<Vec<_>, _>>()?;
        let done = views.iter().all(|(members, stable)| *stable && *members == expected);
        if done {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        thread::sleep(timing.run_interval);
    };
    if !converged {
        bail!(
            "group did not converge within {}ms.\n  To fix: raise --timeout-ms or --join-ms.",
            args.timeout_ms
        );
    }
    println!(
        "{} participants converged in {}ms",
        ids.len(),
        started.elapsed().as_millis()
    );

    for (id, driver) in ids.iter().zip(drivers) {
        driver.leave()?;
        println!("{id}: left");
    }
    Ok(())
}
