//! Raw record inspection.
//!
//! Records are read with an empty schema: no resolvers, so a merged read
//! shows the first sibling and `--siblings` shows them all.

use std::sync::Arc;

use anyhow::{Result, bail};
use concord::{Bucket, LoadOptions, Loaded, Record, Schema};

use crate::Context;

fn bucket(ctx: &Context, name: &str) -> Result<Bucket> {
    let store = ctx.config.store.open(ctx.id.as_str())?;
    Ok(Bucket::new(store, Arc::new(Schema::builder(name).build())))
}

fn print_record(record: &Record) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record.values())?);
    Ok(())
}

pub fn get(ctx: &Context, name: &str, key: &str, siblings: bool) -> Result<()> {
    let options = if siblings {
        LoadOptions::raw()
    } else {
        LoadOptions::default()
    };
    match bucket(ctx, name)?.get_with(key, options)? {
        None => bail!("{name}/{key} does not exist"),
        Some(Loaded::Resolved(record)) => print_record(&record),
        Some(Loaded::Siblings(all)) => {
            println!("{} siblings", all.len());
            for record in &all {
                print_record(record)?;
            }
            Ok(())
        }
    }
}

pub fn keys(ctx: &Context, name: &str) -> Result<()> {
    for key in bucket(ctx, name)?.keys()? {
        println!("{key}");
    }
    Ok(())
}
