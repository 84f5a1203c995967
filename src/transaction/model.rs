/// Transaction registry lifecycle - Stateright Model
/// Exhaustively checks add / expiry-sweep / worker-death interleavings
///
/// Run with: cargo test --release registry_model -- --nocapture
use stateright::*;

/// Abstracted record: match key, absolute expiry (0 = never), owning worker.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RecordModel {
    pub key: u8,
    pub expire: u8,
    pub worker: u8,
}

/// Registry state as the model checker sees it.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RegistryState {
    pub records: Vec<RecordModel>,
    pub now: u8,
    /// True right after a sweep, for the sweep postcondition property.
    pub just_swept: bool,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum RegistryAction {
    /// Register a record expiring one tick from now, or never (0).
    Add { key: u8, worker: u8, forever: bool },
    Tick,
    SweepExpired,
    WorkerDied(u8),
}

/// Configuration for the model checker.
#[derive(Clone)]
pub struct RegistryChecker {
    pub keys: u8,
    pub workers: u8,
    pub horizon: u8,
}

impl Default for RegistryChecker {
    fn default() -> Self {
        Self {
            keys: 2,
            workers: 2,
            horizon: 3,
        }
    }
}

impl Model for RegistryChecker {
    type State = RegistryState;
    type Action = RegistryAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![RegistryState {
            records: Vec::new(),
            now: 0,
            just_swept: false,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for key in 0..self.keys {
            for worker in 0..self.workers {
                actions.push(RegistryAction::Add {
                    key,
                    worker,
                    forever: true,
                });
                actions.push(RegistryAction::Add {
                    key,
                    worker,
                    forever: false,
                });
            }
        }
        if state.now < self.horizon {
            actions.push(RegistryAction::Tick);
        }
        actions.push(RegistryAction::SweepExpired);
        for worker in 0..self.workers {
            actions.push(RegistryAction::WorkerDied(worker));
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        next.just_swept = false;

        match action {
            RegistryAction::Add {
                key,
                worker,
                forever,
            } => {
                // Duplicate keys are ignored, matching the registry.
                if !state.records.iter().any(|r| r.key == key) {
                    next.records.push(RecordModel {
                        key,
                        expire: if forever { 0 } else { state.now + 1 },
                        worker,
                    });
                }
            }
            RegistryAction::Tick => {
                next.now = state.now.saturating_add(1);
            }
            RegistryAction::SweepExpired => {
                let now = state.now;
                next.records.retain(|r| r.expire == 0 || r.expire > now);
                next.just_swept = true;
            }
            RegistryAction::WorkerDied(worker) => {
                next.records.retain(|r| r.worker != worker);
            }
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Safety: no two records share a match key
            Property::always("unique_match_keys", |_, state: &RegistryState| {
                state
                    .records
                    .iter()
                    .enumerate()
                    .all(|(i, a)| state.records[i + 1..].iter().all(|b| a.key != b.key))
            }),
            // Safety: a sweep leaves nothing expired behind
            Property::always("sweep_removes_expired", |_, state: &RegistryState| {
                !state.just_swept
                    || state
                        .records
                        .iter()
                        .all(|r| r.expire == 0 || r.expire > state.now)
            }),
            // Safety: uniqueness bounds the registry size
            Property::always("size_bounded_by_keys", |model: &RegistryChecker, state: &RegistryState| {
                state.records.len() <= model.keys as usize
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn registry_model_check_safety() {
        let checker = RegistryChecker::default().checker().spawn_bfs().join();
        println!("States explored: {}", checker.unique_state_count());
        checker.assert_properties();
    }

    #[test]
    fn registry_model_sweep_path() {
        // Add (expiring) -> Tick -> Sweep leaves an empty registry.
        let model = RegistryChecker::default();
        let mut state = model.init_states()[0].clone();

        state = model
            .next_state(
                &state,
                RegistryAction::Add {
                    key: 0,
                    worker: 0,
                    forever: false,
                },
            )
            .unwrap();
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].expire, 1);

        state = model.next_state(&state, RegistryAction::Tick).unwrap();
        state = model
            .next_state(&state, RegistryAction::SweepExpired)
            .unwrap();
        assert!(state.records.is_empty());
        assert!(state.just_swept);
    }

    #[test]
    fn registry_model_duplicate_add_ignored() {
        let model = RegistryChecker::default();
        let mut state = model.init_states()[0].clone();

        let add = RegistryAction::Add {
            key: 1,
            worker: 0,
            forever: true,
        };
        state = model.next_state(&state, add.clone()).unwrap();
        state = model.next_state(&state, add).unwrap();
        assert_eq!(state.records.len(), 1);
    }

    #[test]
    fn registry_model_worker_death_drops_only_theirs() {
        let model = RegistryChecker::default();
        let mut state = model.init_states()[0].clone();

        state = model
            .next_state(
                &state,
                RegistryAction::Add {
                    key: 0,
                    worker: 0,
                    forever: true,
                },
            )
            .unwrap();
        state = model
            .next_state(
                &state,
                RegistryAction::Add {
                    key: 1,
                    worker: 1,
                    forever: true,
                },
            )
            .unwrap();
        state = model
            .next_state(&state, RegistryAction::WorkerDied(0))
            .unwrap();
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].worker, 1);
    }
}
