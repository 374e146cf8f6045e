//! Account engine: balances, burn and production accounting.
//!
//! Every mutation lands as one write-batch, so a reader sees either the
//! old row or the new one and never an intermediate negative state. A
//! mutation that would drive any counter negative is refused with an
//! invariant violation and leaves the store untouched.

use std::sync::Arc;

use crate::error::{NodeError, Result};
use crate::types::{Account, BURN_ADDRESS, Block, Totals, TotalsDelta, Transaction};

use super::db::{BatchOp, CF_ACCOUNTS, CF_TOTALS, Db};

const TOTALS_KEY: &[u8] = b"totals";

/// Account rows plus the totals singleton.
pub struct AccountStore {
    db: Arc<Db>,
    /// Heights at or below this predate fee debiting (compat).
    legacy_fee_height: u64,
}

fn checked_add(base: u64, delta: i128, what: &str, address: &str) -> Result<u64> {
    let next = base as i128 + delta;
    if next < 0 {
        return Err(NodeError::invariant(format!(
            "negative {what} for {address}: {next}"
        )));
    }
    u64::try_from(next).map_err(|_| NodeError::invariant(format!("{what} overflow for {address}")))
}

impl AccountStore {
    pub fn new(db: Arc<Db>, legacy_fee_height: u64) -> Self {
        AccountStore {
            db,
            legacy_fee_height,
        }
    }

    /// Fetches an account row; when `create_on_error` is set a missing row
    /// is created empty.
    pub fn get_account(&self, address: &str, create_on_error: bool) -> Result<Option<Account>> {
        if let Some(account) = self.db.get::<Account>(CF_ACCOUNTS, address.as_bytes())? {
            return Ok(Some(account));
        }
        if create_on_error {
            let account = Account::empty(address);
            self.db.put(CF_ACCOUNTS, address.as_bytes(), &account)?;
            return Ok(Some(account));
        }
        Ok(None)
    }

    /// Fetch-or-create convenience used by credit paths.
    pub fn get_or_create(&self, address: &str) -> Result<Account> {
        Ok(self
            .get_account(address, true)?
            .unwrap_or_else(|| Account::empty(address)))
    }

    /// Creates an account with an explicit starting balance (genesis).
    pub fn create_account(&self, address: &str, balance: u64) -> Result<Account> {
        let account = Account {
            address: address.to_string(),
            balance,
            produced: 0,
            burned: 0,
        };
        self.db.put(CF_ACCOUNTS, address.as_bytes(), &account)?;
        Ok(account)
    }

    /// Applies a balance delta; with `is_burn` the burned counter moves by
    /// the opposite sign. Refuses mutations that would go negative.
    pub fn change_balance(&self, address: &str, delta: i128, is_burn: bool) -> Result<Account> {
        let mut account = self.get_or_create(address)?;
        account.balance = checked_add(account.balance, delta, "balance", address)?;
        if is_burn {
            account.burned = checked_add(account.burned, -delta, "burned", address)?;
        }
        self.db.put(CF_ACCOUNTS, address.as_bytes(), &account)?;
        Ok(account)
    }

    /// Moves the produced counter, used for reward crediting and rollback.
    pub fn increase_produced(&self, address: &str, delta: i128) -> Result<u64> {
        let mut account = self.get_or_create(address)?;
        account.produced = checked_add(account.produced, delta, "produced", address)?;
        self.db.put(CF_ACCOUNTS, address.as_bytes(), &account)?;
        Ok(account.produced)
    }

    /// Applies one transaction to sender and recipient in a single batch.
    ///
    /// The sender is debited `amount + fee` (`amount` only at legacy
    /// heights) and, on a burn, credited `amount` of burn. The recipient is
    /// credited `amount`; the burn sentinel never holds funds. `revert`
    /// inverts every sign.
    pub fn reflect_transaction(
        &self,
        transaction: &Transaction,
        block_height: u64,
        revert: bool,
    ) -> Result<()> {
        let fee_active = block_height > self.legacy_fee_height;
        let debit = if fee_active {
            transaction.amount as i128 + transaction.fee as i128
        } else {
            transaction.amount as i128
        };
        let credit = transaction.amount as i128;
        let sign: i128 = if revert { -1 } else { 1 };

        let mut ops: Vec<BatchOp> = Vec::with_capacity(2);

        let mut sender = self.get_or_create(&transaction.sender)?;
        sender.balance = checked_add(sender.balance, -debit * sign, "balance", &sender.address)?;
        if transaction.is_burn() {
            sender.burned = checked_add(sender.burned, credit * sign, "burned", &sender.address)?;
        }
        ops.push(BatchOp::Put {
            cf: CF_ACCOUNTS,
            key: sender.address.clone().into_bytes(),
            value: Db::encode(&sender)?,
        });

        if !transaction.is_burn() {
            let mut recipient = if transaction.recipient == transaction.sender {
                sender.clone()
            } else {
                self.get_or_create(&transaction.recipient)?
            };
            recipient.balance =
                checked_add(recipient.balance, credit * sign, "balance", &recipient.address)?;
            ops.push(BatchOp::Put {
                cf: CF_ACCOUNTS,
                key: recipient.address.clone().into_bytes(),
                value: Db::encode(&recipient)?,
            });
        }

        self.db.apply_batch(ops)
    }

    /// Block-wide totals deltas; negative when reverting.
    pub fn get_totals(block: &Block, revert: bool) -> TotalsDelta {
        let fees: i128 = block
            .block_transactions
            .iter()
            .map(|tx| tx.fee as i128)
            .sum();
        let burned: i128 = block
            .block_transactions
            .iter()
            .filter(|tx| tx.recipient == BURN_ADDRESS)
            .map(|tx| tx.amount as i128)
            .sum();
        let produced = block.block_reward as i128;

        let sign: i128 = if revert { -1 } else { 1 };
        TotalsDelta {
            produced: produced * sign,
            fees: fees * sign,
            burned: burned * sign,
        }
    }

    /// Accumulates a block's deltas into the totals singleton.
    ///
    /// Fees only count at post-legacy heights, matching the sender debit
    /// rule, so apply and revert stay symmetric at every height.
    pub fn index_totals(&self, delta: TotalsDelta, block_height: u64) -> Result<()> {
        let mut totals = self.fetch_totals()?;
        totals.produced = checked_add(totals.produced, delta.produced, "produced", "totals")?;
        if block_height > self.legacy_fee_height {
            totals.fees = checked_add(totals.fees, delta.fees, "fees", "totals")?;
        }
        totals.burned = checked_add(totals.burned, delta.burned, "burned", "totals")?;
        self.db.put(CF_TOTALS, TOTALS_KEY, &totals)?;
        Ok(())
    }

    /// Reads the totals singleton; zeroes before genesis installs it.
    pub fn fetch_totals(&self) -> Result<Totals> {
        Ok(self
            .db
            .get::<Totals>(CF_TOTALS, TOTALS_KEY)?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keys;
    use crate::types::transaction::{create_transaction, draft_transaction};
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, AccountStore) {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");
        (tmp, AccountStore::new(db, 0))
    }

    fn dummy_tx(sender_balance_store: &AccountStore, recipient: &str, amount: u64, fee: u64) -> Transaction {
        let keydict = generate_keys();
        sender_balance_store
            .create_account(&keydict.address, 1_000_000)
            .expect("fund sender");
        let draft = draft_transaction(
            keydict.address.clone(),
            recipient,
            amount,
            keydict.public_key.clone(),
            1_700_000_000,
            json!(null),
            1,
        );
        create_transaction(draft, &keydict.private_key, fee).expect("create tx")
    }

    #[test]
    fn change_balance_refuses_negative() {
        let (_tmp, accounts) = store();
        accounts.create_account("ndoa", 100).unwrap();

        let err = accounts.change_balance("ndoa", -101, false).unwrap_err();
        assert!(matches!(err, NodeError::InvariantViolation(_)));
        // Refused mutation left the row untouched.
        assert_eq!(accounts.get_or_create("ndoa").unwrap().balance, 100);

        let account = accounts.change_balance("ndoa", -100, false).unwrap();
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn reflect_moves_amount_and_fee() {
        let (_tmp, accounts) = store();
        let recipient = generate_keys().address;
        let tx = dummy_tx(&accounts, &recipient, 1_000, 256);

        accounts.reflect_transaction(&tx, 2, false).expect("apply");
        let sender = accounts.get_or_create(&tx.sender).unwrap();
        let receiver = accounts.get_or_create(&recipient).unwrap();
        assert_eq!(sender.balance, 1_000_000 - 1_000 - 256);
        assert_eq!(receiver.balance, 1_000);

        accounts.reflect_transaction(&tx, 2, true).expect("revert");
        assert_eq!(accounts.get_or_create(&tx.sender).unwrap().balance, 1_000_000);
        assert_eq!(accounts.get_or_create(&recipient).unwrap().balance, 0);
    }

    #[test]
    fn legacy_heights_skip_the_fee_debit() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");
        let accounts = AccountStore::new(db, 111_111);

        let recipient = generate_keys().address;
        let tx = dummy_tx(&accounts, &recipient, 1_000, 256);

        accounts.reflect_transaction(&tx, 2, false).expect("apply");
        let sender = accounts.get_or_create(&tx.sender).unwrap();
        assert_eq!(sender.balance, 1_000_000 - 1_000);
    }

    #[test]
    fn burn_credits_sender_burned_and_nobody_else() {
        let (_tmp, accounts) = store();
        let tx = dummy_tx(&accounts, BURN_ADDRESS, 5_000, 10);

        accounts.reflect_transaction(&tx, 2, false).expect("apply");
        let sender = accounts.get_or_create(&tx.sender).unwrap();
        assert_eq!(sender.balance, 1_000_000 - 5_000 - 10);
        assert_eq!(sender.burned, 5_000);

        // The sentinel recipient never holds funds.
        assert!(accounts.get_account(BURN_ADDRESS, false).unwrap().is_none());

        accounts.reflect_transaction(&tx, 2, true).expect("revert");
        let sender = accounts.get_or_create(&tx.sender).unwrap();
        assert_eq!(sender.balance, 1_000_000);
        assert_eq!(sender.burned, 0);
    }

    #[test]
    fn totals_accumulate_and_revert() {
        let (_tmp, accounts) = store();
        let recipient = generate_keys().address;
        let tx = dummy_tx(&accounts, &recipient, 700, 30);

        let block = {
            let mut block = Block::genesis("ndocreator", "203.0.113.7", 1_669_852_800);
            block.block_transactions = vec![tx];
            block.block_reward = 1_000_000;
            block
        };

        let delta = AccountStore::get_totals(&block, false);
        accounts.index_totals(delta, 2).expect("apply totals");
        let totals = accounts.fetch_totals().unwrap();
        assert_eq!(totals.produced, 1_000_000);
        assert_eq!(totals.fees, 30);
        assert_eq!(totals.burned, 0);

        let revert = AccountStore::get_totals(&block, true);
        accounts.index_totals(revert, 2).expect("revert totals");
        assert_eq!(accounts.fetch_totals().unwrap(), Totals::default());
    }

    #[test]
    fn produced_counter_moves_both_ways() {
        let (_tmp, accounts) = store();
        assert_eq!(accounts.increase_produced("ndoa", 500).unwrap(), 500);
        assert_eq!(accounts.increase_produced("ndoa", -500).unwrap(), 0);
        assert!(accounts.increase_produced("ndoa", -1).is_err());
    }
}
