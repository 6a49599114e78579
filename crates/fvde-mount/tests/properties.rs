//! Property tests for mount option parsing and the handle table.

use fvde_mount::{HandleTable, MountOptions};
use proptest::prelude::*;
use std::collections::HashMap;

fn option_token() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_=]{0,11}"
}

proptest! {
    #[test]
    fn extended_options_split_into_tokens(
        groups in prop::collection::vec(prop::collection::vec(option_token(), 1..4), 0..5),
        padded in any::<bool>(),
    ) {
        let separator = if padded { " , " } else { "," };
        let args: Vec<String> = groups.iter().map(|group| group.join(separator)).collect();
        let options = MountOptions::default().with_extended_options(&args);

        let expected: Vec<String> = groups.into_iter().flatten().collect();
        prop_assert_eq!(options.extended_options, expected);
    }

    #[test]
    fn empty_option_fragments_are_dropped(commas in 0usize..6) {
        let arg = ",".repeat(commas);
        let options = MountOptions::default().with_extended_options([arg.as_str(), " "]);
        prop_assert!(options.extended_options.is_empty());
    }

    /// `true` inserts, `false` removes the oldest live handle.
    #[test]
    fn live_handle_ids_are_unique(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let table: HandleTable<usize> = HandleTable::new();
        let mut live: HashMap<u64, usize> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();

        for (step, insert) in ops.into_iter().enumerate() {
            if insert {
                let id = table.insert(step);
                prop_assert_ne!(id, 0);
                prop_assert!(live.insert(id, step).is_none(), "id {} handed out twice", id);
                order.push(id);
            } else if !order.is_empty() {
                let id = order.remove(0);
                prop_assert_eq!(table.remove(id), live.remove(&id));
                prop_assert!(!table.contains(id));
            }
        }

        prop_assert_eq!(table.len(), live.len());
        for (id, value) in &live {
            prop_assert_eq!(table.get(*id).map(|v| *v), Some(*value));
        }
    }
}
