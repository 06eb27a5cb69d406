//! Oracle registry
//!
//! Owns every oracle record. Records are created once with their index
//! assignment and never mutated or removed.

use crate::events::{EventBus, OracleEvent};
use crate::indexes::IndexGenerator;
use flightsure_core::constants::INDEXES_PER_ORACLE;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::types::{Amount, Identity, OracleIndex, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A registered oracle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRecord {
    pub identity: Identity,
    pub indexes: [OracleIndex; INDEXES_PER_ORACLE],
    pub registered_at: Timestamp,
}

impl OracleRecord {
    pub fn holds(&self, index: OracleIndex) -> bool {
        self.indexes.contains(&index)
    }
}

pub struct OracleRegistry {
    oracles: RwLock<HashMap<Identity, OracleRecord>>,
    generator: Arc<IndexGenerator>,
    registration_fee: Amount,
    events: EventBus,
}

impl OracleRegistry {
    pub fn new(generator: Arc<IndexGenerator>, registration_fee: Amount, events: EventBus) -> Self {
        Self {
            oracles: RwLock::new(HashMap::new()),
            generator,
            registration_fee,
            events,
        }
    }

    pub fn registration_fee(&self) -> Amount {
        self.registration_fee
    }

    /// Register an oracle and assign its indexes
    pub fn register(&self, identity: Identity, fee: Amount) -> Result<[OracleIndex; INDEXES_PER_ORACLE]> {
        if fee < self.registration_fee {
            return Err(FlightSureError::InsufficientFee {
                required: self.registration_fee,
                paid: fee,
            });
        }

        let record = {
            let mut oracles = self.oracles.write();
            if oracles.contains_key(&identity) {
                return Err(FlightSureError::AlreadyRegistered(format!("oracle {}", identity)));
            }

            let record = OracleRecord {
                identity,
                indexes: self.generator.generate_indexes(&identity),
                registered_at: chrono::Utc::now().timestamp(),
            };
            oracles.insert(identity, record.clone());
            record
        };

        info!(oracle = %identity, indexes = ?record.indexes, "Oracle registered");
        self.events.publish(OracleEvent::OracleRegistered {
            oracle: identity,
            indexes: record.indexes,
        });

        Ok(record.indexes)
    }

    /// Indexes held by a registered oracle
    pub fn lookup(&self, identity: &Identity) -> Result<[OracleIndex; INDEXES_PER_ORACLE]> {
        self.oracles
            .read()
            .get(identity)
            .map(|r| r.indexes)
            .ok_or_else(|| FlightSureError::NotRegistered(format!("oracle {}", identity)))
    }

    pub fn is_registered(&self, identity: &Identity) -> bool {
        self.oracles.read().contains_key(identity)
    }

    /// Oracles responsible for `index`
    pub fn holders_of(&self, index: OracleIndex) -> Vec<Identity> {
        let mut holders: Vec<Identity> = self
            .oracles
            .read()
            .values()
            .filter(|r| r.holds(index))
            .map(|r| r.identity)
            .collect();
        holders.sort();
        holders
    }

    pub fn len(&self) -> usize {
        self.oracles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use flightsure_core::constants::ONE_ETHER;

    fn registry() -> OracleRegistry {
        let generator = IndexGenerator::new(Arc::new(SeededEntropy::new(11)), 10, 256).unwrap();
        OracleRegistry::new(Arc::new(generator), ONE_ETHER, EventBus::default())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        let oracle = Identity::from_label("oracle-1");

        let indexes = registry.register(oracle, ONE_ETHER).unwrap();
        assert_eq!(registry.lookup(&oracle).unwrap(), indexes);
        assert!(registry.is_registered(&oracle));
        assert_eq!(registry.len(), 1);

        for index in indexes {
            assert!(registry.holders_of(index).contains(&oracle));
        }
    }

    #[test]
    fn test_insufficient_fee() {
        let registry = registry();
        let err = registry
            .register(Identity::from_label("cheap"), ONE_ETHER - 1)
            .unwrap_err();

        assert_eq!(
            err,
            FlightSureError::InsufficientFee {
                required: ONE_ETHER,
                paid: ONE_ETHER - 1
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregistration_rejected_and_indexes_kept() {
        let registry = registry();
        let oracle = Identity::from_label("oracle-1");

        let indexes = registry.register(oracle, ONE_ETHER).unwrap();
        let err = registry.register(oracle, 2 * ONE_ETHER).unwrap_err();

        assert!(matches!(err, FlightSureError::AlreadyRegistered(_)));
        assert_eq!(registry.lookup(&oracle).unwrap(), indexes);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = registry();
        assert!(matches!(
            registry.lookup(&Identity::from_label("nobody")),
            Err(FlightSureError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_registration_event() {
        let registry = registry();
        let mut rx = registry.events.subscribe();
        let oracle = Identity::from_label("oracle-1");
        let indexes = registry.register(oracle, ONE_ETHER).unwrap();

        match rx.try_recv().unwrap() {
            OracleEvent::OracleRegistered { oracle: o, indexes: i } => {
                assert_eq!(o, oracle);
                assert_eq!(i, indexes);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
