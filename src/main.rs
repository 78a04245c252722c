// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use oblivious_tables::{
    config::ClusterConfig, global_table::GlobalTable, operators::AssociateOperator, rpc, Cluster,
    PartitionId, Result, TableError,
};
use simplelog::{Config, WriteLogger};
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Parser)]
#[clap(name = "oblivious-tables", about = "Data-oblivious distributed relational operators")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs one operator on partitioned table files and prints the result.
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        task: Operator,

        /// Sort, grouping or join columns of the first input.
        #[arg(long, value_delimiter = ',', default_value = "0")]
        cols: Vec<usize>,

        /// Join columns of the second input.
        #[arg(long, value_delimiter = ',', default_value = "0")]
        other_cols: Vec<usize>,

        /// Aggregated column, or the multiplicity column of an expansion.
        #[arg(long, default_value_t = 1)]
        value_col: usize,

        /// Aggregate function: add, mul, max or min.
        #[arg(long, default_value = "add")]
        op: String,

        /// Rows to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Table files, read as `<input>_p<i>` on partition `i`.
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Serves one partition to a coordinator and to its peers.
    Worker {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        id: PartitionId,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Operator {
    Sort,
    Aggregate,
    Pkjoin,
    Join,
    SodaJoin,
    Expansion,
}

fn aggregate_op(name: &str, group_by: Vec<usize>, col: usize) -> Result<AssociateOperator> {
    match name {
        "add" => Ok(AssociateOperator::add(group_by, col)),
        "mul" => Ok(AssociateOperator::mul(group_by, col)),
        "max" => Ok(AssociateOperator::max(group_by, col)),
        "min" => Ok(AssociateOperator::min(group_by, col)),
        other => Err(TableError::MalformedOperator(format!("unknown aggregate {:?}", other))),
    }
}

fn init_logging(config: &ClusterConfig) -> Result<()> {
    WriteLogger::init(config.log_level_filter()?, Config::default(), std::io::stderr())
        .map_err(|e| TableError::InvalidConfig(e.to_string()))
}

fn second_input(cluster: &Arc<Cluster>, inputs: &[String]) -> Result<GlobalTable> {
    let path = inputs
        .get(1)
        .ok_or_else(|| TableError::InvalidConfig("this task joins two inputs".into()))?;
    GlobalTable::load(cluster, path)
}

#[allow(clippy::too_many_arguments)]
fn run(
    config: &ClusterConfig,
    task: Operator,
    cols: &[usize],
    other_cols: &[usize],
    value_col: usize,
    op: &str,
    limit: usize,
    inputs: &[String],
) -> Result<()> {
    let cluster = Cluster::from_config(config)?;
    let mut table = GlobalTable::load(&cluster, &inputs[0])?;
    match task {
        Operator::Sort => table.sort(cols)?,
        Operator::Aggregate => {
            let op = aggregate_op(op, cols.to_vec(), value_col)?;
            table.sort(cols)?;
            table.prefix_aggregate(&op, false)?;
        }
        Operator::Pkjoin => {
            let other = second_input(&cluster, inputs)?;
            table.pkjoin(other, cols, other_cols)?;
        }
        Operator::Join => {
            let other = second_input(&cluster, inputs)?;
            let total = table.join(other, cols, other_cols)?;
            info!("join produced {} rows", total);
        }
        Operator::SodaJoin => {
            let other = second_input(&cluster, inputs)?;
            let stats = table.soda_join(other, cols, other_cols)?;
            info!("{:?}", stats);
        }
        Operator::Expansion => {
            let total = u64::try_from(table.sum(value_col)?)?;
            table.expansion(value_col, total, false)?;
        }
    }

    print!("{}", table.render(limit)?);
    let metrics = cluster.metrics().snapshot();
    for (phase, elapsed) in &metrics.phases {
        println!("{}\t{:?}", phase, elapsed);
    }
    let comm = metrics.total_comm();
    println!(
        "total\t{:?}\t{} rows\t{} bytes sent",
        metrics.total_time(),
        comm.rows,
        comm.bytes
    );
    Ok(())
}

fn main() -> Result<()> {
    match Args::parse().command {
        Command::Run {
            config,
            task,
            cols,
            other_cols,
            value_col,
            op,
            limit,
            inputs,
        } => {
            let config = ClusterConfig::load(config.as_deref())?;
            init_logging(&config)?;
            run(&config, task, &cols, &other_cols, value_col, &op, limit, &inputs)
        }
        Command::Worker { config, id } => {
            let config = ClusterConfig::load(config.as_deref())?;
            init_logging(&config)?;
            let addr = config.workers.get(id).ok_or_else(|| {
                TableError::InvalidConfig(format!("no address for worker {}", id))
            })?;
            let partition = Arc::new(Cluster::worker_partition(&config, id)?);
            rpc::serve(addr, partition)
        }
    }
}
