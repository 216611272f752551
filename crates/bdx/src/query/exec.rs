//! Execution of a lowered [`Plan`] against one shard.

use anyhow::Result;

use super::plan::Plan;
use crate::shard::utils::{complement_sorted, intersect_sorted, union_sorted};
use crate::shard::ShardReader;

/// Evaluate `plan` over one shard, producing sorted doc ids. Doc order
/// within a shard is `(path, address, name)` order, so these ids stream
/// records in the stable output order.
pub fn execute(plan: &Plan, shard: &ShardReader) -> Result<Vec<u32>> {
    match plan {
        Plan::Nothing => Ok(Vec::new()),
        Plan::All => Ok((0..shard.doc_count()).collect()),
        Plan::Term(term) => shard.postings(term),
        Plan::Prefix(prefix) => shard.prefix_postings(prefix),
        Plan::Range { slot, lo, hi } => shard.range_postings(*slot, *lo, *hi),
        Plan::And(parts) => {
            let mut acc: Option<Vec<u32>> = None;
            for part in parts {
                let docs = execute(part, shard)?;
                acc = Some(match acc {
                    None => docs,
                    Some(prev) => intersect_sorted(&prev, &docs),
                });
                if acc.as_ref().map(|a| a.is_empty()).unwrap_or(false) {
                    break;
                }
            }
            Ok(acc.unwrap_or_default())
        }
        Plan::Or(parts) => {
            let mut acc: Vec<u32> = Vec::new();
            for part in parts {
                let docs = execute(part, shard)?;
                acc = union_sorted(&acc, &docs);
            }
            Ok(acc)
        }
        Plan::Not(inner) => {
            let docs = execute(inner, shard)?;
            Ok(complement_sorted(&docs, shard.doc_count()))
        }
    }
}
