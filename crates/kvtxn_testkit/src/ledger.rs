//! Account-transfer simulation.
//!
//! Money moves between accounts in two-record transactions while many
//! threads compete for the same accounts. Whatever fails, the total across
//! all accounts must stay at `accounts * initial_balance`.
//!
//! Each transfer locks both accounts up front, reads the balances under the
//! locks, then applies the new balances with the same transaction ID so the
//! coordinator re-uses the locks.

use kvtxn_codec::{bins, Bins, Value};
use kvtxn_core::{Coordinator, Generations, TxnError, TxnId, WriteSet};
use kvtxn_store::{DeleteOptions, Key, StoreError, WriteMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Account identifier bin.
pub const ACCOUNT_ID_BIN: &str = "account-id";

/// Balance bin, in pence.
pub const BALANCE_BIN: &str = "balance-pence";

/// Errors raised by the simulation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An account record already exists.
    #[error("account {0} already exists")]
    AccountExists(String),

    /// An account record is missing or has no balance.
    #[error("account {0} has no balance")]
    MissingAccount(String),

    /// The transaction failed.
    #[error(transparent)]
    Txn(#[from] TxnError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        Self::Txn(TxnError::Store(err))
    }
}

/// Result type for simulation operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Counters from a simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Transfers attempted.
    pub attempted: usize,
    /// Transfers committed.
    pub successful: usize,
    /// Transfers refused because an account was locked.
    pub lock_refused: usize,
}

impl TransferStats {
    fn merge(&mut self, other: TransferStats) {
        self.attempted += other.attempted;
        self.successful += other.successful;
        self.lock_refused += other.lock_refused;
    }
}

/// A set of accounts and the transfers between them.
pub struct AccountSimulation {
    coordinator: Arc<Coordinator>,
    namespace: String,
    set: String,
    accounts: usize,
    initial_balance: i64,
    max_transfer: i64,
}

impl AccountSimulation {
    /// Creates a simulation of `accounts` accounts holding `initial_balance`
    /// pence each.
    pub fn new(
        coordinator: Arc<Coordinator>,
        namespace: impl Into<String>,
        accounts: usize,
        initial_balance: i64,
    ) -> Self {
        Self {
            coordinator,
            namespace: namespace.into(),
            set: "account-transfer-simulation".to_string(),
            accounts,
            initial_balance,
            max_transfer: 1_000,
        }
    }

    /// Sets the largest amount a random transfer moves.
    #[must_use]
    pub fn max_transfer(mut self, pence: i64) -> Self {
        self.max_transfer = pence.max(1);
        self
    }

    /// Number of accounts.
    pub fn accounts(&self) -> usize {
        self.accounts
    }

    /// Account ID for account number `n` (1-based).
    pub fn account_id(&self, n: usize) -> String {
        format!("ACCOUNT-{n:06}")
    }

    /// Key of account `account_id`.
    ///
    /// # Errors
    ///
    /// Fails if the namespace is invalid.
    pub fn account_key(&self, account_id: &str) -> LedgerResult<Key> {
        Ok(Key::new(self.namespace.as_str(), self.set.as_str(), account_id)?)
    }

    /// Creates every account with the initial balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountExists`] if an account is already
    /// present, typically left over from an unfinished run.
    pub fn create_accounts(&self) -> LedgerResult<()> {
        for n in 1..=self.accounts {
            let id = self.account_id(n);
            let key = self.account_key(&id)?;
            match self.coordinator.store().put(
                WriteMode::CreateOnly,
                &key,
                &account_bins(&id, self.initial_balance),
            ) {
                Ok(()) => {}
                Err(StoreError::KeyExists(_)) => return Err(LedgerError::AccountExists(id)),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Deletes every account.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn remove_accounts(&self) -> LedgerResult<()> {
        for n in 1..=self.accounts {
            let key = self.account_key(&self.account_id(n))?;
            self.coordinator.store().delete(&key, &DeleteOptions::new())?;
        }
        Ok(())
    }

    /// Returns the balance of `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::MissingAccount`] if the account has no balance.
    pub fn balance(&self, account_id: &str) -> LedgerResult<i64> {
        let key = self.account_key(account_id)?;
        self.coordinator
            .store()
            .get(&key)?
            .and_then(|r| r.get_integer(BALANCE_BIN))
            .ok_or_else(|| LedgerError::MissingAccount(account_id.to_string()))
    }

    /// Sum of all balances.
    ///
    /// # Errors
    ///
    /// Fails if any account is missing.
    pub fn total_balance(&self) -> LedgerResult<i64> {
        (1..=self.accounts).try_fold(0i64, |total, n| {
            Ok(total + self.balance(&self.account_id(n))?)
        })
    }

    /// The total every run must preserve.
    pub fn expected_total(&self) -> i64 {
        i64::try_from(self.accounts).unwrap_or(i64::MAX) * self.initial_balance
    }

    /// Moves `amount` pence from one account to another atomically.
    ///
    /// Returns the transaction ID used.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::LockHeld`] (wrapped) if either account is locked
    /// by another transfer; nothing is changed in that case.
    pub fn transfer(&self, from: &str, to: &str, amount: i64) -> LedgerResult<TxnId> {
        let txn_id = TxnId::generate();
        let from_key = self.account_key(from)?;
        let to_key = self.account_key(to)?;
        let locks = self.coordinator.locks();

        locks.create_lock(&from_key, &txn_id)?;
        if let Err(e) = locks.create_lock(&to_key, &txn_id) {
            locks.remove_lock(&from_key, &txn_id)?;
            return Err(e.into());
        }

        let balances = self.balance(from).and_then(|f| Ok((f, self.balance(to)?)));
        let (from_balance, to_balance) = match balances {
            Ok(b) => b,
            Err(e) => {
                locks.remove_locks([&from_key, &to_key], &txn_id)?;
                return Err(e);
            }
        };

        let writes = WriteSet::new()
            .with_put(from_key, account_bins(from, from_balance - amount))
            .with_put(to_key, account_bins(to, to_balance + amount));
        self.coordinator
            .apply_writes(&writes, &txn_id, &Generations::new())?;
        Ok(txn_id)
    }

    /// Runs `threads` threads, each attempting `iterations` random transfers.
    ///
    /// Transfers refused with `LockHeld` are counted, not retried.
    ///
    /// # Errors
    ///
    /// Returns the first error other than a refused lock.
    pub fn run_concurrent(
        self: &Arc<Self>,
        threads: usize,
        iterations: usize,
        seed: u64,
    ) -> LedgerResult<TransferStats> {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let sim = Arc::clone(self);
                thread::spawn(move || sim.run_worker(iterations, seed.wrapping_add(t as u64)))
            })
            .collect();

        let mut stats = TransferStats::default();
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(worker)) => stats.merge(worker),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn run_worker(&self, iterations: usize, seed: u64) -> LedgerResult<TransferStats> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut stats = TransferStats::default();
        if self.accounts < 2 {
            return Ok(stats);
        }

        for _ in 0..iterations {
            let a = rng.gen_range(1..=self.accounts);
            let mut b = rng.gen_range(1..=self.accounts);
            while b == a {
                b = rng.gen_range(1..=self.accounts);
            }
            let amount = rng.gen_range(1..=self.max_transfer);

            stats.attempted += 1;
            match self.transfer(&self.account_id(a), &self.account_id(b), amount) {
                Ok(_) => stats.successful += 1,
                Err(LedgerError::Txn(TxnError::LockHeld { .. })) => stats.lock_refused += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(stats)
    }
}

fn account_bins(account_id: &str, balance: i64) -> Bins {
    bins([
        (ACCOUNT_ID_BIN, Value::from(account_id)),
        (BALANCE_BIN, Value::Integer(balance)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestHarness;

    fn simulation(accounts: usize) -> (TestHarness, Arc<AccountSimulation>) {
        let h = TestHarness::memory();
        let sim = AccountSimulation::new(Arc::clone(&h.coordinator), "test", accounts, 10_000);
        sim.create_accounts().unwrap();
        (h, Arc::new(sim))
    }

    #[test]
    fn account_ids_are_padded() {
        let (_, sim) = simulation(1);
        assert_eq!(sim.account_id(7), "ACCOUNT-000007");
    }

    #[test]
    fn create_twice_fails() {
        let (_, sim) = simulation(3);
        assert!(matches!(
            sim.create_accounts(),
            Err(LedgerError::AccountExists(_))
        ));
    }

    #[test]
    fn transfer_moves_money() {
        let (h, sim) = simulation(2);
        let (a, b) = (sim.account_id(1), sim.account_id(2));

        sim.transfer(&a, &b, 250).unwrap();
        assert_eq!(sim.balance(&a).unwrap(), 9_750);
        assert_eq!(sim.balance(&b).unwrap(), 10_250);
        assert_eq!(sim.total_balance().unwrap(), sim.expected_total());
        assert!(h
            .unlocked([sim.account_key(&a).unwrap(), sim.account_key(&b).unwrap()].iter())
            .unwrap());
    }

    #[test]
    fn transfer_refused_when_locked() {
        let (h, sim) = simulation(2);
        let (a, b) = (sim.account_id(1), sim.account_id(2));
        let holder = TxnId::new("holder");
        h.coordinator
            .locks()
            .create_lock(&sim.account_key(&b).unwrap(), &holder)
            .unwrap();

        let err = sim.transfer(&a, &b, 100).unwrap_err();
        assert!(matches!(err, LedgerError::Txn(TxnError::LockHeld { .. })));
        assert_eq!(sim.balance(&a).unwrap(), 10_000);
        assert!(h.unlocked([sim.account_key(&a).unwrap()].iter()).unwrap());
    }

    #[test]
    fn remove_accounts_clears_records() {
        let (_, sim) = simulation(3);
        sim.remove_accounts().unwrap();
        assert!(matches!(
            sim.total_balance(),
            Err(LedgerError::MissingAccount(_))
        ));
    }

    #[test]
    fn single_threaded_run_conserves_total() {
        let (_, sim) = simulation(10);
        let stats = sim.run_concurrent(1, 50, 7).unwrap();
        assert_eq!(stats.attempted, 50);
        assert_eq!(stats.successful, 50);
        assert_eq!(sim.total_balance().unwrap(), sim.expected_total());
    }
}
