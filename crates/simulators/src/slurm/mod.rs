//! Slurm client tools: `sinfo`, `squeue`, `scontrol`.
//!
//! All three read the same node view of the cluster. Jobs are not modelled
//! separately; every allocated or mixed node runs one synthetic job.

mod scontrol;
mod sinfo;
mod squeue;

pub use scontrol::Scontrol;
pub use sinfo::Sinfo;
pub use squeue::Squeue;

use gpulab_types::{Cluster, DgxNode, NodeId, SlurmState};
use std::time::Duration;

pub const SLURM_VERSION: &str = "23.02.7";

/// Node state as printed by `sinfo`, with `*` for a node not responding.
pub(crate) fn short_state(node: &DgxNode) -> String {
    let mut s = node.slurm_state.to_string();
    if !node.bmc.chassis_power_on {
        s.push('*');
    }
    s
}

/// Compress node names into Slurm hostlist form: `dgx-[00-02,05]`.
pub fn compress_hostlist<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> String {
    // (prefix, digit width) -> numbers, in first-seen order.
    let mut groups: Vec<((String, usize), Vec<u64>)> = Vec::new();
    let mut plain: Vec<String> = Vec::new();

    for id in ids {
        let s = id.as_str();
        let digits = s.chars().rev().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            plain.push(s.to_string());
            continue;
        }
        let (prefix, num) = s.split_at(s.len() - digits);
        let Ok(n) = num.parse::<u64>() else {
            plain.push(s.to_string());
            continue;
        };
        let key = (prefix.to_string(), digits);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, nums)) => nums.push(n),
            None => groups.push((key, vec![n])),
        }
    }

    let mut parts = Vec::new();
    for ((prefix, width), mut nums) in groups {
        nums.sort_unstable();
        nums.dedup();
        if let [only] = nums.as_slice() {
            parts.push(format!("{prefix}{only:0width$}"));
            continue;
        }
        let mut ranges = Vec::new();
        let mut start = nums[0];
        let mut prev = nums[0];
        for &n in &nums[1..] {
            if n != prev + 1 {
                ranges.push(range_text(start, prev, width));
                start = n;
            }
            prev = n;
        }
        ranges.push(range_text(start, prev, width));
        parts.push(format!("{prefix}[{}]", ranges.join(",")));
    }
    parts.extend(plain);
    parts.join(",")
}

fn range_text(lo: u64, hi: u64, width: usize) -> String {
    if lo == hi {
        format!("{lo:0width$}")
    } else {
        format!("{lo:0width$}-{hi:0width$}")
    }
}

/// A synthetic running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Job {
    pub id: u32,
    pub name: &'static str,
    pub user: &'static str,
    pub partition: String,
    pub node: NodeId,
}

const JOB_NAMES: [&str; 4] = ["train_llm", "nccl_tests", "bert_ft", "resnet50"];

/// One job per allocated or mixed node, numbered by node position.
pub(crate) fn running_jobs(cluster: &Cluster) -> Vec<Job> {
    cluster
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| matches!(n.slurm_state, SlurmState::Alloc | SlurmState::Mix))
        .map(|(i, n)| Job {
            id: 1001 + i as u32,
            name: JOB_NAMES[i % JOB_NAMES.len()],
            user: "researcher",
            partition: n.partition.clone(),
            node: n.id.clone(),
        })
        .collect()
}

/// Elapsed time in Slurm's `[days-]hours:minutes:seconds` form.
pub(crate) fn elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (h, m, s) = (rem / 3600, (rem / 60) % 60, rem % 60);
    if days > 0 {
        format!("{days}-{h:02}:{m:02}:{s:02}")
    } else if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(*n)).collect()
    }

    #[test]
    fn test_compress_hostlist() {
        assert_eq!(
            compress_hostlist(&ids(&["dgx-00", "dgx-01", "dgx-02"])),
            "dgx-[00-02]"
        );
        assert_eq!(compress_hostlist(&ids(&["dgx-03"])), "dgx-03");
        assert_eq!(
            compress_hostlist(&ids(&["dgx-00", "dgx-02", "dgx-03"])),
            "dgx-[00,02-03]"
        );
        assert_eq!(
            compress_hostlist(&ids(&["dgx-01", "login", "gpu1"])),
            "dgx-01,gpu1,login"
        );
        assert_eq!(compress_hostlist(&ids(&[])), "");
    }

    #[test]
    fn test_elapsed() {
        assert_eq!(elapsed(Duration::from_secs(65)), "1:05");
        assert_eq!(elapsed(Duration::from_secs(3_725)), "1:02:05");
        assert_eq!(elapsed(Duration::from_secs(90_000)), "1-01:00:00");
    }
}
