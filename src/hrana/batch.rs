use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};

use super::stmt::{
    execute_stmt, proto_error_from_stmt_error, proto_stmt_to_query, StmtError,
};
use super::{proto, ProtocolError, Version};
use crate::database::Executor;

/// A batch step condition with its step references validated against the step order.
#[derive(Debug)]
enum Cond {
    Ok { step: usize },
    Err { step: usize },
    Not { cond: Box<Cond> },
    And { conds: Vec<Cond> },
    Or { conds: Vec<Cond> },
    IsAutocommit,
}

fn proto_cond_to_cond(cond: &proto::BatchCond, version: Version, max_step_i: usize) -> Result<Cond> {
    let try_convert_step = |step: u32| -> Result<usize, ProtocolError> {
        let step = usize::try_from(step).map_err(|_| ProtocolError::BatchCondBadStep)?;
        if step >= max_step_i {
            return Err(ProtocolError::BatchCondBadStep);
        }
        Ok(step)
    };

    let cond = match cond {
        proto::BatchCond::Ok { step } => Cond::Ok {
            step: try_convert_step(*step)?,
        },
        proto::BatchCond::Error { step } => Cond::Err {
            step: try_convert_step(*step)?,
        },
        proto::BatchCond::Not { cond } => Cond::Not {
            cond: proto_cond_to_cond(cond, version, max_step_i)?.into(),
        },
        proto::BatchCond::And { conds } => Cond::And {
            conds: conds
                .iter()
                .map(|cond| proto_cond_to_cond(cond, version, max_step_i))
                .collect::<Result<_>>()?,
        },
        proto::BatchCond::Or { conds } => Cond::Or {
            conds: conds
                .iter()
                .map(|cond| proto_cond_to_cond(cond, version, max_step_i))
                .collect::<Result<_>>()?,
        },
        proto::BatchCond::IsAutocommit {} => {
            if version < Version::Hrana3 {
                bail!(ProtocolError::NotSupported {
                    what: "BatchCond of type `is_autocommit`",
                    min_version: Version::Hrana3,
                })
            }
            Cond::IsAutocommit
        }
    };

    Ok(cond)
}

/// Step outcomes seen so far: `None` for a skipped step, `Some(true)`/`Some(false)` for a step
/// that ran and succeeded or failed.
fn eval_cond(cond: &Cond, outcomes: &[Option<bool>]) -> bool {
    match cond {
        Cond::Ok { step } => matches!(outcomes.get(*step), Some(Some(true))),
        Cond::Err { step } => matches!(outcomes.get(*step), Some(Some(false))),
        Cond::Not { cond } => !eval_cond(cond, outcomes),
        Cond::And { conds } => conds.iter().all(|cond| eval_cond(cond, outcomes)),
        Cond::Or { conds } => conds.iter().any(|cond| eval_cond(cond, outcomes)),
        // the backend is always in autocommit
        Cond::IsAutocommit => true,
    }
}

/// Runs the steps of a batch in order. A step whose condition is false is skipped (null result
/// and null error); a step that fails records its error and the batch moves on, so later steps
/// can branch on the failure.
pub fn execute_batch(
    db: &dyn Executor,
    version: Version,
    batch: &proto::Batch,
    sqls: &HashMap<i32, String>,
) -> Result<proto::BatchResult> {
    // a malformed condition tree fails the whole batch request
    let mut conds = Vec::with_capacity(batch.steps.len());
    for (step_i, step) in batch.steps.iter().enumerate() {
        let cond = step
            .condition
            .as_ref()
            .map(|cond| proto_cond_to_cond(cond, version, step_i))
            .transpose()?;
        conds.push(cond);
    }

    let mut step_results = Vec::with_capacity(batch.steps.len());
    let mut step_errors = Vec::with_capacity(batch.steps.len());
    let mut outcomes: Vec<Option<bool>> = Vec::with_capacity(batch.steps.len());

    for (step, cond) in batch.steps.iter().zip(&conds) {
        let enabled = cond.as_ref().map_or(true, |cond| eval_cond(cond, &outcomes));
        if !enabled {
            step_results.push(None);
            step_errors.push(None);
            outcomes.push(None);
            continue;
        }

        match execute_step(db, version, &step.stmt, sqls) {
            Ok(result) => {
                step_results.push(Some(result));
                step_errors.push(None);
                outcomes.push(Some(true));
            }
            Err(err) => {
                let error = proto_error_from_step_error(err)?;
                step_results.push(None);
                step_errors.push(Some(error));
                outcomes.push(Some(false));
            }
        }
    }

    Ok(proto::BatchResult {
        step_results,
        step_errors,
    })
}

fn execute_step(
    db: &dyn Executor,
    version: Version,
    stmt: &proto::Stmt,
    sqls: &HashMap<i32, String>,
) -> Result<proto::StmtResult> {
    let query = proto_stmt_to_query(stmt, sqls)?;
    execute_stmt(db, &query, version)
}

/// Statement and SQL-resolution failures become the step's error entry; anything else is an
/// internal error and aborts the request.
fn proto_error_from_step_error(err: anyhow::Error) -> Result<proto::Error> {
    match err.downcast::<StmtError>() {
        Ok(stmt_error) => Ok(proto_error_from_stmt_error(&stmt_error)),
        Err(err) => match err.downcast::<ProtocolError>() {
            Ok(proto_error) => Ok(proto::Error {
                message: proto_error.to_string(),
                code: proto_error.code().into(),
            }),
            Err(err) => Err(err),
        },
    }
}

/// Runs a sequence of statements as one opaque script. The backend stops at the first failing
/// statement; nothing is returned on success.
pub fn execute_sequence(db: &dyn Executor, sql: &str) -> Result<()> {
    db.exec_script(sql)
        .map_err(|e| anyhow!(StmtError::Backend(e)))
}
