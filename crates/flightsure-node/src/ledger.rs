//! # Insurance Ledger
//!
//! In-memory accounts for airlines, flights, policies and passenger credit.
//!
//! ```text
//! airline ──fund──► funded ──register_flight──► flight
//!                                                 │
//! passenger ──buy_insurance──────────────────► policy
//!                                                 │ LateAirline
//!                                                 ▼
//!                            credit (premium × 3/2) ──withdraw──► paid out
//! ```
//!
//! Lock order is `policies` before `credits`; no other method holds two
//! ledger locks at once.

use crate::config::LedgerConfig;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::ledger::{AirlineLedger, FlightRegistry, InsureeLedger};
use flightsure_core::types::{Amount, FlightRef, Identity, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

type FlightKey = (FlightRef, Timestamp);

/// Airline membership and deposit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlineAccount {
    pub funds: Amount,
}

/// A single passenger's cover on one flight
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub passenger: Identity,
    pub premium: Amount,
    pub credited: bool,
}

pub struct InMemoryLedger {
    config: LedgerConfig,
    airlines: RwLock<HashMap<Identity, AirlineAccount>>,
    flights: RwLock<HashMap<FlightKey, Timestamp>>,
    policies: RwLock<HashMap<FlightKey, Vec<Policy>>>,
    credits: RwLock<HashMap<Identity, Amount>>,
}

impl InMemoryLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            airlines: RwLock::new(HashMap::new()),
            flights: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            credits: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Register the first airline without a vote
    pub fn seed_airline(&self, airline: Identity) {
        self.airlines.write().entry(airline).or_default();
        info!(%airline, "Genesis airline registered");
    }

    /// Deposit funds; each deposit must cover the full funding requirement
    pub fn fund_airline(&self, airline: &Identity, amount: Amount) -> Result<Amount> {
        let required = self.config.airline_funding();
        let mut airlines = self.airlines.write();
        let account = airlines
            .get_mut(airline)
            .ok_or_else(|| FlightSureError::NotRegistered(format!("airline {}", airline)))?;
        if amount < required {
            return Err(FlightSureError::InsufficientFee {
                required,
                paid: amount,
            });
        }
        account.funds = account.funds.saturating_add(amount);
        info!(%airline, funds = %account.funds, "Airline funded");
        Ok(account.funds)
    }

    pub fn airline_account(&self, airline: &Identity) -> Option<AirlineAccount> {
        self.airlines.read().get(airline).cloned()
    }

    pub fn register_flight(
        &self,
        airline: &Identity,
        code: &str,
        timestamp: Timestamp,
    ) -> Result<FlightRef> {
        self.register_flight_at(airline, code, timestamp, chrono::Utc::now().timestamp())
    }

    pub fn register_flight_at(
        &self,
        airline: &Identity,
        code: &str,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<FlightRef> {
        if code.is_empty() {
            return Err(FlightSureError::InvalidInput("empty flight code".to_string()));
        }
        if !self.is_airline_funded(airline) {
            return Err(FlightSureError::Unauthorized(format!(
                "airline {} is not a funded member",
                airline
            )));
        }

        let flight = FlightRef::new(*airline, code);
        let mut flights = self.flights.write();
        let key = (flight.clone(), timestamp);
        if flights.contains_key(&key) {
            return Err(FlightSureError::AlreadyRegistered(format!(
                "flight {} at {}",
                flight, timestamp
            )));
        }
        flights.insert(key, now);
        info!(%flight, timestamp, "Flight registered");
        Ok(flight)
    }

    pub fn buy_insurance(
        &self,
        passenger: Identity,
        flight: &FlightRef,
        timestamp: Timestamp,
        amount: Amount,
    ) -> Result<()> {
        if !self.is_flight_registered(flight, timestamp) {
            return Err(FlightSureError::NotRegistered(format!(
                "flight {} at {}",
                flight, timestamp
            )));
        }
        if amount == 0 || amount > self.config.max_insurance() {
            return Err(FlightSureError::OutOfRange {
                what: "insurance amount",
                value: u64::try_from(amount).unwrap_or(u64::MAX),
            });
        }

        let mut policies = self.policies.write();
        let cover = policies.entry((flight.clone(), timestamp)).or_default();
        if cover.iter().any(|p| p.passenger == passenger) {
            return Err(FlightSureError::AlreadyRegistered(format!(
                "policy for {} on {}",
                passenger, flight
            )));
        }
        cover.push(Policy {
            passenger,
            premium: amount,
            credited: false,
        });
        debug!(%passenger, %flight, premium = %amount, "Insurance bought");
        Ok(())
    }

    pub fn policies_for(&self, flight: &FlightRef, timestamp: Timestamp) -> Vec<Policy> {
        self.policies
            .read()
            .get(&(flight.clone(), timestamp))
            .cloned()
            .unwrap_or_default()
    }

    pub fn credit_of(&self, passenger: &Identity) -> Amount {
        self.credits.read().get(passenger).copied().unwrap_or(0)
    }

    /// Pay out the passenger's whole credit
    pub fn withdraw(&self, passenger: &Identity) -> Result<Amount> {
        let amount = self.credits.write().remove(passenger).unwrap_or(0);
        if amount == 0 {
            return Err(FlightSureError::OutOfRange {
                what: "withdrawable credit",
                value: 0,
            });
        }
        info!(%passenger, %amount, "Credit withdrawn");
        Ok(amount)
    }
}

impl AirlineLedger for InMemoryLedger {
    fn is_airline_registered(&self, airline: &Identity) -> bool {
        self.airlines.read().contains_key(airline)
    }

    fn is_airline_funded(&self, airline: &Identity) -> bool {
        self.airlines
            .read()
            .get(airline)
            .map_or(false, |a| a.funds >= self.config.airline_funding())
    }

    fn registered_airline_count(&self) -> usize {
        self.airlines.read().len()
    }

    fn register_airline(&self, airline: Identity) {
        self.airlines.write().entry(airline).or_default();
    }
}

impl FlightRegistry for InMemoryLedger {
    fn is_flight_registered(&self, flight: &FlightRef, timestamp: Timestamp) -> bool {
        self.flights.read().contains_key(&(flight.clone(), timestamp))
    }
}

impl InsureeLedger for InMemoryLedger {
    fn credit_insurees(&self, flight: &FlightRef, timestamp: Timestamp) -> usize {
        let mut policies = self.policies.write();
        let Some(cover) = policies.get_mut(&(flight.clone(), timestamp)) else {
            return 0;
        };

        let mut credits = self.credits.write();
        let mut credited = 0;
        for policy in cover.iter_mut().filter(|p| !p.credited) {
            policy.credited = true;
            let payout = self.config.payout_for(policy.premium);
            let balance = credits.entry(policy.passenger).or_insert(0);
            *balance = balance.saturating_add(payout);
            credited += 1;
        }
        if credited > 0 {
            info!(%flight, timestamp, credited, "Insurees credited");
        }
        credited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightsure_core::constants::ONE_ETHER;

    const DEPARTURE: Timestamp = 1_700_000_000;

    fn funded_ledger() -> (InMemoryLedger, Identity) {
        let ledger = InMemoryLedger::new(LedgerConfig::default());
        let airline = Identity::from_label("airline-0");
        ledger.seed_airline(airline);
        ledger.fund_airline(&airline, 10 * ONE_ETHER).unwrap();
        (ledger, airline)
    }

    #[test]
    fn test_funding_rules() {
        let ledger = InMemoryLedger::new(LedgerConfig::default());
        let airline = Identity::from_label("airline-0");

        let err = ledger.fund_airline(&airline, 10 * ONE_ETHER).unwrap_err();
        assert!(matches!(err, FlightSureError::NotRegistered(_)));

        ledger.seed_airline(airline);
        assert!(ledger.is_airline_registered(&airline));
        assert!(!ledger.is_airline_funded(&airline));

        let err = ledger.fund_airline(&airline, ONE_ETHER).unwrap_err();
        assert_eq!(
            err,
            FlightSureError::InsufficientFee {
                required: 10 * ONE_ETHER,
                paid: ONE_ETHER
            }
        );

        assert_eq!(ledger.fund_airline(&airline, 10 * ONE_ETHER).unwrap(), 10 * ONE_ETHER);
        assert!(ledger.is_airline_funded(&airline));
        assert_eq!(ledger.registered_airline_count(), 1);
    }

    #[test]
    fn test_flight_registration() {
        let (ledger, airline) = funded_ledger();
        let flight = ledger.register_flight(&airline, "ND1309", DEPARTURE).unwrap();
        assert!(ledger.is_flight_registered(&flight, DEPARTURE));
        assert!(!ledger.is_flight_registered(&flight, DEPARTURE + 1));

        let err = ledger.register_flight(&airline, "ND1309", DEPARTURE).unwrap_err();
        assert!(matches!(err, FlightSureError::AlreadyRegistered(_)));

        let unfunded = Identity::from_label("airline-1");
        ledger.register_airline(unfunded);
        let err = ledger.register_flight(&unfunded, "ND1", DEPARTURE).unwrap_err();
        assert!(matches!(err, FlightSureError::Unauthorized(_)));
    }

    #[test]
    fn test_buy_insurance_limits() {
        let (ledger, airline) = funded_ledger();
        let flight = ledger.register_flight(&airline, "ND1309", DEPARTURE).unwrap();
        let passenger = Identity::from_label("passenger-0");

        let unknown = FlightRef::new(airline, "XX0");
        assert!(matches!(
            ledger.buy_insurance(passenger, &unknown, DEPARTURE, ONE_ETHER),
            Err(FlightSureError::NotRegistered(_))
        ));
        assert!(matches!(
            ledger.buy_insurance(passenger, &flight, DEPARTURE, 0),
            Err(FlightSureError::OutOfRange { .. })
        ));
        assert!(matches!(
            ledger.buy_insurance(passenger, &flight, DEPARTURE, ONE_ETHER + 1),
            Err(FlightSureError::OutOfRange { .. })
        ));

        ledger.buy_insurance(passenger, &flight, DEPARTURE, ONE_ETHER).unwrap();
        assert!(matches!(
            ledger.buy_insurance(passenger, &flight, DEPARTURE, ONE_ETHER),
            Err(FlightSureError::AlreadyRegistered(_))
        ));
        assert_eq!(ledger.policies_for(&flight, DEPARTURE).len(), 1);
    }

    #[test]
    fn test_credit_once_and_withdraw() {
        let (ledger, airline) = funded_ledger();
        let flight = ledger.register_flight(&airline, "ND1309", DEPARTURE).unwrap();
        let alice = Identity::from_label("alice");
        let bob = Identity::from_label("bob");
        ledger.buy_insurance(alice, &flight, DEPARTURE, ONE_ETHER).unwrap();
        ledger.buy_insurance(bob, &flight, DEPARTURE, ONE_ETHER / 2).unwrap();

        assert_eq!(ledger.credit_insurees(&flight, DEPARTURE), 2);
        assert_eq!(ledger.credit_insurees(&flight, DEPARTURE), 0);
        assert_eq!(ledger.credit_of(&alice), 3 * ONE_ETHER / 2);
        assert_eq!(ledger.credit_of(&bob), 3 * ONE_ETHER / 4);

        assert_eq!(ledger.withdraw(&alice).unwrap(), 3 * ONE_ETHER / 2);
        assert_eq!(ledger.credit_of(&alice), 0);
        assert!(matches!(
            ledger.withdraw(&alice),
            Err(FlightSureError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_credit_unknown_flight_is_noop() {
        let (ledger, airline) = funded_ledger();
        assert_eq!(ledger.credit_insurees(&FlightRef::new(airline, "NONE"), DEPARTURE), 0);
    }
}
