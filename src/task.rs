// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The operations a partition can be asked to run, and their wire form.
//!
//! On the wire a task is a flat map of strings with a `task` entry naming the operation. Other
//! parameters are decimal, lists are joined with `_`, operators use their parenthesized form and
//! rows travel in a binary body. A reply is `(ret:VALUE)` or `(err:MESSAGE)`.

use crate::{
    local_table::Phase,
    mailbox::{SlotKey, SlotKind},
    operators::AssociateOperator,
    tuple::Tuple,
    PartitionId, Result, TableError, TableId, Value,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

/// One partition-local operation. `table` names the table the operation runs on; `other`
/// names a second table on the same partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    Create { table: TableId, num_columns: usize, rows: Vec<Tuple> },
    LoadFile { table: TableId, path: String },
    Copy { table: TableId, into: TableId },
    Drop { table: TableId },
    Rows { table: TableId },
    Size { table: TableId },
    NumRows { table: TableId },
    NumColumns { table: TableId },
    Sum { table: TableId, col: usize },
    Max { table: TableId, col: usize },

    AppendCol { table: TableId, value: Value },
    AppendRowIds { table: TableId },
    InsertCol { table: TableId, index: usize, value: Value },
    CopyCol { table: TableId, col: usize },
    DeleteCol { table: TableId, col: usize },
    Project { table: TableId, cols: Vec<usize> },
    MoveColsAhead { table: TableId, cols: Vec<usize> },
    PadToSize { table: TableId, size: usize },
    FitTo { table: TableId, size: usize },
    Union { table: TableId, other: TableId },

    LocalSort { table: TableId, cols: Vec<usize> },
    RandomShuffle { table: TableId },
    ShuffleByKey { table: TableId, key: Vec<usize>, seed: u64, bound: usize },
    SodaShuffleByKey { table: TableId, key: Vec<usize>, seed: u64, bound: usize },
    ShuffleByCol { table: TableId, col: usize, bound: usize },
    ShuffleMerge { table: TableId },
    GetPivots { table: TableId, cols: Vec<usize> },
    PartitionByPivots { table: TableId, cols: Vec<usize>, bound: usize },
    SortMerge { table: TableId, cols: Vec<usize> },

    GroupByAggregate { table: TableId, op: AssociateOperator },
    GroupByAggregateBase {
        table: TableId,
        op: AssociateOperator,
        prefix: bool,
        phase: Phase,
        reverse: bool,
    },
    RemoveDupAfterPrefix { table: TableId, cols: Vec<usize> },

    TagForeignRows { table: TableId, num_join_cols: usize },
    PkJoinCombine { table: TableId, other: TableId, num_join_cols: usize, ori_r: usize, align: usize },
    FinalizePkJoin { table: TableId, num_join_cols: usize, ori_r: usize, align: usize },
    JoinAlignment { table: TableId, m: usize },
    JoinFinalCombine { table: TableId, other: TableId, num_join_cols: usize },
    LocalJoin { table: TableId, other: TableId, num_join_cols: usize, bound: Option<usize> },

    ExpansionPrepare { table: TableId, col: usize },
    ExpansionTargets { table: TableId, col: usize, m: usize },
    ExpansionDistribute { table: TableId, m: usize },
    ExpansionFill { table: TableId, phase: Phase },

    SodaStep1 { table: TableId, cols: Vec<usize>, count_col: usize },
    SodaStep2 { table: TableId, cap: usize },
    SodaStep3 { table: TableId },
    SodaStep5 { table: TableId },

    /// Hands a sealed fragment to the partition's mailbox.
    PutSlot { key: SlotKey, block: Vec<u8> },
}

/// The result of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Unit,
    Int(i64),
    Names(Vec<String>),
    Rows { num_columns: usize, rows: Vec<Tuple> },
}

impl Reply {
    pub fn into_int(self) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(v),
            other => Err(TableError::MalformedRequest(format!(
                "expected a number, got {:?}",
                other
            ))),
        }
    }

    pub fn into_count(self) -> Result<usize> {
        Ok(usize::try_from(self.into_int()?)?)
    }

    pub fn into_names(self) -> Result<Vec<String>> {
        match self {
            Self::Names(names) => Ok(names),
            other => Err(TableError::MalformedRequest(format!(
                "expected column names, got {:?}",
                other
            ))),
        }
    }

    pub fn into_rows(self) -> Result<Vec<Tuple>> {
        match self {
            Self::Rows { rows, .. } => Ok(rows),
            other => Err(TableError::MalformedRequest(format!(
                "expected rows, got {:?}",
                other
            ))),
        }
    }
}

/// The flat string map form of a [`Task`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
}

/// The wire form of a [`Reply`] or of an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub result: String,
    #[serde(default)]
    pub body: Vec<u8>,
}

fn join_list(values: &[usize]) -> String {
    values
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("_")
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Local => "local",
        Phase::Boundary => "boundary",
        Phase::Combine => "combine",
        Phase::Apply => "apply",
    }
}

fn kind_name(kind: SlotKind) -> &'static str {
    match kind {
        SlotKind::Shuffle => "shuffle",
        SlotKind::Pivots => "pivots",
        SlotKind::Boundary => "boundary",
        SlotKind::Correction => "correction",
    }
}

impl Request {
    fn new(task: &str) -> Self {
        let mut request = Self::default();
        request.params.insert("task".into(), task.into());
        request
    }

    fn with(mut self, name: &str, value: impl Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn task_name(&self) -> Result<&str> {
        self.raw("task")
    }

    fn raw(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TableError::MalformedRequest(format!("missing parameter {}", name)))
    }

    fn get<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.raw(name)?;
        raw.parse().map_err(|_| {
            TableError::MalformedRequest(format!("parameter {} has bad value {:?}", name, raw))
        })
    }

    fn list(&self, name: &str) -> Result<Vec<usize>> {
        let raw = self.raw(name)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        raw.split('_')
            .map(|v| {
                v.parse().map_err(|_| {
                    TableError::MalformedRequest(format!("parameter {} has bad list {:?}", name, raw))
                })
            })
            .collect()
    }

    fn flag(&self, name: &str) -> Result<bool> {
        match self.raw(name)? {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(TableError::MalformedRequest(format!(
                "parameter {} has bad flag {:?}",
                name, other
            ))),
        }
    }

    fn phase(&self) -> Result<Phase> {
        match self.raw("phase")? {
            "local" => Ok(Phase::Local),
            "boundary" => Ok(Phase::Boundary),
            "combine" => Ok(Phase::Combine),
            "apply" => Ok(Phase::Apply),
            other => Err(TableError::MalformedRequest(format!("unknown phase {:?}", other))),
        }
    }

    fn kind(&self) -> Result<SlotKind> {
        match self.raw("kind")? {
            "shuffle" => Ok(SlotKind::Shuffle),
            "pivots" => Ok(SlotKind::Pivots),
            "boundary" => Ok(SlotKind::Boundary),
            "correction" => Ok(SlotKind::Correction),
            other => Err(TableError::MalformedRequest(format!("unknown slot kind {:?}", other))),
        }
    }
}

impl Task {
    /// The table a task runs on, if any.
    pub fn table(&self) -> Option<TableId> {
        match self {
            Self::PutSlot { .. } => None,
            Self::Create { table, .. }
            | Self::LoadFile { table, .. }
            | Self::Copy { table, .. }
            | Self::Drop { table }
            | Self::Rows { table }
            | Self::Size { table }
            | Self::NumRows { table }
            | Self::NumColumns { table }
            | Self::Sum { table, .. }
            | Self::Max { table, .. }
            | Self::AppendCol { table, .. }
            | Self::AppendRowIds { table }
            | Self::InsertCol { table, .. }
            | Self::CopyCol { table, .. }
            | Self::DeleteCol { table, .. }
            | Self::Project { table, .. }
            | Self::MoveColsAhead { table, .. }
            | Self::PadToSize { table, .. }
            | Self::FitTo { table, .. }
            | Self::Union { table, .. }
            | Self::LocalSort { table, .. }
            | Self::RandomShuffle { table }
            | Self::ShuffleByKey { table, .. }
            | Self::SodaShuffleByKey { table, .. }
            | Self::ShuffleByCol { table, .. }
            | Self::ShuffleMerge { table }
            | Self::GetPivots { table, .. }
            | Self::PartitionByPivots { table, .. }
            | Self::SortMerge { table, .. }
            | Self::GroupByAggregate { table, .. }
            | Self::GroupByAggregateBase { table, .. }
            | Self::RemoveDupAfterPrefix { table, .. }
            | Self::TagForeignRows { table, .. }
            | Self::PkJoinCombine { table, .. }
            | Self::FinalizePkJoin { table, .. }
            | Self::JoinAlignment { table, .. }
            | Self::JoinFinalCombine { table, .. }
            | Self::LocalJoin { table, .. }
            | Self::ExpansionPrepare { table, .. }
            | Self::ExpansionTargets { table, .. }
            | Self::ExpansionDistribute { table, .. }
            | Self::ExpansionFill { table, .. }
            | Self::SodaStep1 { table, .. }
            | Self::SodaStep2 { table, .. }
            | Self::SodaStep3 { table }
            | Self::SodaStep5 { table } => Some(*table),
        }
    }

    pub fn to_request(&self) -> Request {
        match self {
            Self::Create { table, num_columns, rows } => Request::new("create")
                .with("table", table)
                .with("num_columns", num_columns)
                .with_body(Tuple::encode_rows(rows)),
            Self::LoadFile { table, path } => {
                Request::new("load_file").with("table", table).with("path", path)
            }
            Self::Copy { table, into } => Request::new("copy").with("table", table).with("into", into),
            Self::Drop { table } => Request::new("drop").with("table", table),
            Self::Rows { table } => Request::new("rows").with("table", table),
            Self::Size { table } => Request::new("size").with("table", table),
            Self::NumRows { table } => Request::new("num_rows").with("table", table),
            Self::NumColumns { table } => Request::new("num_columns").with("table", table),
            Self::Sum { table, col } => Request::new("sum").with("table", table).with("col", col),
            Self::Max { table, col } => Request::new("max").with("table", table).with("col", col),
            Self::AppendCol { table, value } => {
                Request::new("append_col").with("table", table).with("value", value)
            }
            Self::AppendRowIds { table } => Request::new("append_row_ids").with("table", table),
            Self::InsertCol { table, index, value } => Request::new("insert_col")
                .with("table", table)
                .with("index", index)
                .with("value", value),
            Self::CopyCol { table, col } => {
                Request::new("copy_col").with("table", table).with("col", col)
            }
            Self::DeleteCol { table, col } => {
                Request::new("delete_col").with("table", table).with("col", col)
            }
            Self::Project { table, cols } => Request::new("project")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::MoveColsAhead { table, cols } => Request::new("move_cols_ahead")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::PadToSize { table, size } => {
                Request::new("pad_to_size").with("table", table).with("size", size)
            }
            Self::FitTo { table, size } => {
                Request::new("fit_to").with("table", table).with("size", size)
            }
            Self::Union { table, other } => {
                Request::new("union").with("table", table).with("other", other)
            }
            Self::LocalSort { table, cols } => Request::new("local_sort")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::RandomShuffle { table } => Request::new("random_shuffle").with("table", table),
            Self::ShuffleByKey { table, key, seed, bound } => Request::new("shuffle_by_key")
                .with("table", table)
                .with("key", join_list(key))
                .with("seed", seed)
                .with("bound", bound),
            Self::SodaShuffleByKey { table, key, seed, bound } => {
                Request::new("soda_shuffle_by_key")
                    .with("table", table)
                    .with("key", join_list(key))
                    .with("seed", seed)
                    .with("bound", bound)
            }
            Self::ShuffleByCol { table, col, bound } => Request::new("shuffle_by_col")
                .with("table", table)
                .with("col", col)
                .with("bound", bound),
            Self::ShuffleMerge { table } => Request::new("shuffle_merge").with("table", table),
            Self::GetPivots { table, cols } => Request::new("get_pivots")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::PartitionByPivots { table, cols, bound } => Request::new("partition_by_pivots")
                .with("table", table)
                .with("cols", join_list(cols))
                .with("bound", bound),
            Self::SortMerge { table, cols } => Request::new("sort_merge")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::GroupByAggregate { table, op } => {
                Request::new("group_by_aggregate").with("table", table).with("op", op)
            }
            Self::GroupByAggregateBase { table, op, prefix, phase, reverse } => {
                Request::new("group_by_aggregate_base")
                    .with("table", table)
                    .with("op", op)
                    .with("prefix", u8::from(*prefix))
                    .with("phase", phase_name(*phase))
                    .with("reverse", u8::from(*reverse))
            }
            Self::RemoveDupAfterPrefix { table, cols } => Request::new("remove_dup_after_prefix")
                .with("table", table)
                .with("cols", join_list(cols)),
            Self::TagForeignRows { table, num_join_cols } => Request::new("tag_foreign_rows")
                .with("table", table)
                .with("num_join_cols", num_join_cols),
            Self::PkJoinCombine { table, other, num_join_cols, ori_r, align } => {
                Request::new("pk_join_combine")
                    .with("table", table)
                    .with("other", other)
                    .with("num_join_cols", num_join_cols)
                    .with("ori_r", ori_r)
                    .with("align", align)
            }
            Self::FinalizePkJoin { table, num_join_cols, ori_r, align } => {
                Request::new("finalize_pk_join")
                    .with("table", table)
                    .with("num_join_cols", num_join_cols)
                    .with("ori_r", ori_r)
                    .with("align", align)
            }
            Self::JoinAlignment { table, m } => {
                Request::new("join_alignment").with("table", table).with("m", m)
            }
            Self::JoinFinalCombine { table, other, num_join_cols } => {
                Request::new("join_final_combine")
                    .with("table", table)
                    .with("other", other)
                    .with("num_join_cols", num_join_cols)
            }
            Self::LocalJoin { table, other, num_join_cols, bound } => Request::new("local_join")
                .with("table", table)
                .with("other", other)
                .with("num_join_cols", num_join_cols)
                .with("bound", bound.map_or(-1, |b| b as i64)),
            Self::ExpansionPrepare { table, col } => {
                Request::new("expansion_prepare").with("table", table).with("col", col)
            }
            Self::ExpansionTargets { table, col, m } => Request::new("expansion_targets")
                .with("table", table)
                .with("col", col)
                .with("m", m),
            Self::ExpansionDistribute { table, m } => {
                Request::new("expansion_distribute").with("table", table).with("m", m)
            }
            Self::ExpansionFill { table, phase } => Request::new("expansion_fill")
                .with("table", table)
                .with("phase", phase_name(*phase)),
            Self::SodaStep1 { table, cols, count_col } => Request::new("soda_step1")
                .with("table", table)
                .with("cols", join_list(cols))
                .with("count_col", count_col),
            Self::SodaStep2 { table, cap } => {
                Request::new("soda_step2").with("table", table).with("cap", cap)
            }
            Self::SodaStep3 { table } => Request::new("soda_step3").with("table", table),
            Self::SodaStep5 { table } => Request::new("soda_step5").with("table", table),
            Self::PutSlot { key, block } => Request::new("put_slot")
                .with("table", key.table)
                .with("source", key.source)
                .with("target", key.target)
                .with("kind", kind_name(key.kind))
                .with_body(block.clone()),
        }
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        let r = request;
        let table = || r.get::<TableId>("table");
        Ok(match r.task_name()? {
            "create" => {
                let num_columns = r.get("num_columns")?;
                Self::Create {
                    table: table()?,
                    num_columns,
                    rows: Tuple::decode_rows(&r.body, num_columns)?,
                }
            }
            "load_file" => Self::LoadFile { table: table()?, path: r.raw("path")?.to_string() },
            "copy" => Self::Copy { table: table()?, into: r.get("into")? },
            "drop" => Self::Drop { table: table()? },
            "rows" => Self::Rows { table: table()? },
            "size" => Self::Size { table: table()? },
            "num_rows" => Self::NumRows { table: table()? },
            "num_columns" => Self::NumColumns { table: table()? },
            "sum" => Self::Sum { table: table()?, col: r.get("col")? },
            "max" => Self::Max { table: table()?, col: r.get("col")? },
            "append_col" => Self::AppendCol { table: table()?, value: r.get("value")? },
            "append_row_ids" => Self::AppendRowIds { table: table()? },
            "insert_col" => Self::InsertCol {
                table: table()?,
                index: r.get("index")?,
                value: r.get("value")?,
            },
            "copy_col" => Self::CopyCol { table: table()?, col: r.get("col")? },
            "delete_col" => Self::DeleteCol { table: table()?, col: r.get("col")? },
            "project" => Self::Project { table: table()?, cols: r.list("cols")? },
            "move_cols_ahead" => Self::MoveColsAhead { table: table()?, cols: r.list("cols")? },
            "pad_to_size" => Self::PadToSize { table: table()?, size: r.get("size")? },
            "fit_to" => Self::FitTo { table: table()?, size: r.get("size")? },
            "union" => Self::Union { table: table()?, other: r.get("other")? },
            "local_sort" => Self::LocalSort { table: table()?, cols: r.list("cols")? },
            "random_shuffle" => Self::RandomShuffle { table: table()? },
            "shuffle_by_key" => Self::ShuffleByKey {
                table: table()?,
                key: r.list("key")?,
                seed: r.get("seed")?,
                bound: r.get("bound")?,
            },
            "soda_shuffle_by_key" => Self::SodaShuffleByKey {
                table: table()?,
                key: r.list("key")?,
                seed: r.get("seed")?,
                bound: r.get("bound")?,
            },
            "shuffle_by_col" => Self::ShuffleByCol {
                table: table()?,
                col: r.get("col")?,
                bound: r.get("bound")?,
            },
            "shuffle_merge" => Self::ShuffleMerge { table: table()? },
            "get_pivots" => Self::GetPivots { table: table()?, cols: r.list("cols")? },
            "partition_by_pivots" => Self::PartitionByPivots {
                table: table()?,
                cols: r.list("cols")?,
                bound: r.get("bound")?,
            },
            "sort_merge" => Self::SortMerge { table: table()?, cols: r.list("cols")? },
            "group_by_aggregate" => Self::GroupByAggregate { table: table()?, op: r.get("op")? },
            "group_by_aggregate_base" => Self::GroupByAggregateBase {
                table: table()?,
                op: r.get("op")?,
                prefix: r.flag("prefix")?,
                phase: r.phase()?,
                reverse: r.flag("reverse")?,
            },
            "remove_dup_after_prefix" => {
                Self::RemoveDupAfterPrefix { table: table()?, cols: r.list("cols")? }
            }
            "tag_foreign_rows" => Self::TagForeignRows {
                table: table()?,
                num_join_cols: r.get("num_join_cols")?,
            },
            "pk_join_combine" => Self::PkJoinCombine {
                table: table()?,
                other: r.get("other")?,
                num_join_cols: r.get("num_join_cols")?,
                ori_r: r.get("ori_r")?,
                align: r.get("align")?,
            },
            "finalize_pk_join" => Self::FinalizePkJoin {
                table: table()?,
                num_join_cols: r.get("num_join_cols")?,
                ori_r: r.get("ori_r")?,
                align: r.get("align")?,
            },
            "join_alignment" => Self::JoinAlignment { table: table()?, m: r.get("m")? },
            "join_final_combine" => Self::JoinFinalCombine {
                table: table()?,
                other: r.get("other")?,
                num_join_cols: r.get("num_join_cols")?,
            },
            "local_join" => {
                let bound: i64 = r.get("bound")?;
                Self::LocalJoin {
                    table: table()?,
                    other: r.get("other")?,
                    num_join_cols: r.get("num_join_cols")?,
                    bound: if bound < 0 { None } else { Some(usize::try_from(bound)?) },
                }
            }
            "expansion_prepare" => Self::ExpansionPrepare { table: table()?, col: r.get("col")? },
            "expansion_targets" => Self::ExpansionTargets {
                table: table()?,
                col: r.get("col")?,
                m: r.get("m")?,
            },
            "expansion_distribute" => Self::ExpansionDistribute { table: table()?, m: r.get("m")? },
            "expansion_fill" => Self::ExpansionFill { table: table()?, phase: r.phase()? },
            "soda_step1" => Self::SodaStep1 {
                table: table()?,
                cols: r.list("cols")?,
                count_col: r.get("count_col")?,
            },
            "soda_step2" => Self::SodaStep2 { table: table()?, cap: r.get("cap")? },
            "soda_step3" => Self::SodaStep3 { table: table()? },
            "soda_step5" => Self::SodaStep5 { table: table()? },
            "put_slot" => Self::PutSlot {
                key: SlotKey::new(
                    table()?,
                    r.get::<PartitionId>("source")?,
                    r.get::<PartitionId>("target")?,
                    r.kind()?,
                ),
                block: r.body.clone(),
            },
            other => {
                return Err(TableError::MalformedRequest(format!("unknown task {:?}", other)))
            }
        })
    }
}

impl Response {
    pub fn from_result(result: Result<Reply>) -> Self {
        match result {
            Ok(Reply::Unit) => Self {
                result: "(ret:)".into(),
                body: Vec::new(),
            },
            Ok(Reply::Int(v)) => Self {
                result: format!("(ret:{})", v),
                body: Vec::new(),
            },
            Ok(Reply::Names(names)) => Self {
                result: format!("(ret:names {})", names.join(" ")),
                body: Vec::new(),
            },
            Ok(Reply::Rows { num_columns, rows }) => Self {
                result: format!("(ret:rows {})", num_columns),
                body: Tuple::encode_rows(&rows),
            },
            Err(e) => Self {
                result: format!("(err:{})", e),
                body: Vec::new(),
            },
        }
    }

    pub fn into_result(self) -> Result<Reply> {
        let inner = |prefix: &str| {
            self.result
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(')'))
        };
        if let Some(message) = inner("(err:") {
            return Err(TableError::Remote(message.to_string()));
        }
        let value = inner("(ret:")
            .ok_or_else(|| TableError::MalformedRequest(format!("bad reply {:?}", self.result)))?;
        if value.is_empty() {
            return Ok(Reply::Unit);
        }
        if let Some(names) = value.strip_prefix("names ") {
            return Ok(Reply::Names(
                names.split_whitespace().map(str::to_string).collect(),
            ));
        }
        if let Some(width) = value.strip_prefix("rows ") {
            let num_columns: usize = width.parse().map_err(|_| {
                TableError::MalformedRequest(format!("bad row width in {:?}", self.result))
            })?;
            return Ok(Reply::Rows {
                num_columns,
                rows: Tuple::decode_rows(&self.body, num_columns)?,
            });
        }
        value
            .parse()
            .map(Reply::Int)
            .map_err(|_| TableError::MalformedRequest(format!("bad reply {:?}", self.result)))
    }
}
