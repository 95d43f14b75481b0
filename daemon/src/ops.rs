//! Operation instructions emitted by the monitor stage and their per-tick
//! merge-by-class rule: at most one op of each class survives a tick —
//! car-warn start dominates stop, record start dominates stop, fps-adjust
//! pull-up dominates reduce.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpInst {
    CarWarnStart,
    CarWarnStop,
    RecordStart { tag: String, rec_secs: u64 },
    RecordStop,
    SendMessage(String),
    PersonDetected,
}

impl OpInst {
    fn class(&self) -> OpClass {
        match self {
            OpInst::CarWarnStart | OpInst::CarWarnStop => OpClass::CarWarn,
            OpInst::RecordStart { .. } | OpInst::RecordStop => OpClass::Record,
            OpInst::SendMessage(_) => OpClass::Message,
            OpInst::PersonDetected => OpClass::PersonDetected,
        }
    }

    /// Within a class, "start"/pull-up variants dominate "stop"/reduce
    /// variants.
    fn dominates(&self, other: &OpInst) -> bool {
        matches!(
            (self, other),
            (OpInst::CarWarnStart, OpInst::CarWarnStop)
                | (OpInst::RecordStart { .. }, OpInst::RecordStop)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OpClass {
    CarWarn,
    Record,
    Message,
    PersonDetected,
}

/// Merges one tick's worth of raw ops down to at most one survivor per
/// class, preserving first-seen order among surviving classes.
pub fn merge_ops(ops: Vec<OpInst>) -> Vec<OpInst> {
    let mut order: Vec<OpClass> = Vec::new();
    let mut winners: std::collections::HashMap<OpClass, OpInst> = std::collections::HashMap::new();

    for op in ops {
        let class = op.class();
        match winners.get(&class) {
            None => {
                order.push(class);
                winners.insert(class, op);
            }
            Some(existing) => {
                if op.dominates(existing) {
                    winners.insert(class, op);
                }
                // else: existing survives (either it already dominates, or
                // the two are the same variant and order doesn't matter).
            }
        }
    }

    order.into_iter().filter_map(|class| winners.remove(&class)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_start_dominates_stop_regardless_of_order() {
        let merged = merge_ops(vec![
            OpInst::RecordStop,
            OpInst::RecordStart { tag: "car".into(), rec_secs: 30 },
        ]);
        assert_eq!(merged.len(), 1);
        assert!(matches!(merged[0], OpInst::RecordStart { .. }));
    }

    #[test]
    fn distinct_classes_all_survive() {
        let merged = merge_ops(vec![
            OpInst::CarWarnStart,
            OpInst::RecordStart { tag: "car".into(), rec_secs: 30 },
            OpInst::SendMessage("car blocking".into()),
        ]);
        assert_eq!(merged.len(), 3);
    }
}
