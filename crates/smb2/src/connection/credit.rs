//! Credit-based flow control.

use std::sync::Mutex;

use tokio::sync::Notify;

/// One credit covers 64 KiB of sequence-number space.
pub const CREDIT_UNIT: usize = 64 * 1024;

/// Computes the credit charge for a payload of `size` bytes.
pub fn credit_charge(size: usize) -> u16 {
    size.div_ceil(CREDIT_UNIT).max(1) as u16
}

#[derive(Debug)]
struct Ledger {
    balance: u16,
    opening: u16,
}

/// The connection's credit ledger.
///
/// A connection starts with a single credit and climbs toward its target
/// window by over-requesting through the opening counter. Senders debit
/// their charge through [`CreditAccount::request`] before a message id is
/// assigned; the receive loop credits every response grant back through
/// [`CreditAccount::grant`]. The ledger mutex is a leaf lock, held only
/// across ledger updates.
#[derive(Debug)]
pub struct CreditAccount {
    ledger: Mutex<Ledger>,
    wakeup: Notify,
}

impl CreditAccount {
    pub fn new(max_credit_balance: u16) -> CreditAccount {
        CreditAccount {
            ledger: Mutex::new(Ledger {
                balance: 1,
                opening: max_credit_balance.saturating_sub(1),
            }),
            wakeup: Notify::new(),
        }
    }

    /// Takes up to `wanted` credits, suspending while the balance is empty.
    ///
    /// Returns the granted amount and whether the full request was covered.
    /// A partial grant caps the caller's payload at 64 KiB per granted
    /// credit; the caller re-chunks. Connections without the large-MTU
    /// capability must pass `wanted = 1`.
    pub async fn request(&self, wanted: u16) -> (u16, bool) {
        loop {
            {
                let mut ledger = self.ledger.lock().unwrap();
                if ledger.balance > 0 {
                    let granted = wanted.min(ledger.balance);
                    ledger.balance -= granted;
                    return (granted, granted == wanted);
                }
            }
            self.wakeup.notified().await;
        }
    }

    /// Drains the opening counter: how many extra credits the next request
    /// should ask for in flight.
    pub fn opening(&self) -> u16 {
        let mut ledger = self.ledger.lock().unwrap();
        std::mem::take(&mut ledger.opening)
    }

    /// Credits a response grant back into the ledger.
    ///
    /// A grant smaller than `prior_request` leaves the shortfall in the
    /// opening counter so a later request asks again. The balance never
    /// rests below one credit, and one waiter is woken per positive grant.
    pub fn grant(&self, credit_response: u16, prior_request: u16) {
        {
            let mut ledger = self.ledger.lock().unwrap();
            if credit_response < prior_request {
                ledger.opening = ledger
                    .opening
                    .saturating_add(prior_request - credit_response);
            }
            ledger.balance = ledger.balance.saturating_add(credit_response);
            if ledger.balance == 0 {
                ledger.balance = 1;
            }
        }
        if credit_response > 0 {
            self.wakeup.notify_one();
        }
    }

    /// Current spendable balance.
    pub fn balance(&self) -> u16 {
        self.ledger.lock().unwrap().balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn charge_is_per_64k_unit() {
        assert_eq!(credit_charge(0), 1);
        assert_eq!(credit_charge(1), 1);
        assert_eq!(credit_charge(CREDIT_UNIT), 1);
        assert_eq!(credit_charge(CREDIT_UNIT + 1), 2);
        assert_eq!(credit_charge(10 * CREDIT_UNIT), 10);
    }

    #[tokio::test]
    async fn opens_with_one_credit_and_an_opening_request() {
        let account = CreditAccount::new(128);
        assert_eq!(account.balance(), 1);
        assert_eq!(account.opening(), 127);
        // drained
        assert_eq!(account.opening(), 0);
    }

    #[tokio::test]
    async fn grant_conserves_balance() {
        let account = CreditAccount::new(64);
        let before = account.balance();

        // charge 1, response grants 1
        let (granted, complete) = account.request(1).await;
        assert!(complete);
        account.grant(1, granted);
        assert_eq!(account.balance(), before);

        // charge 4, response grants 10: balance grows by the surplus
        account.grant(9, 0); // fund the window first
        let (granted, complete) = account.request(4).await;
        assert!(complete);
        let mid = account.balance();
        account.grant(10, granted);
        assert_eq!(account.balance(), mid + 10);
    }

    #[tokio::test]
    async fn partial_grant_reports_incomplete() {
        let account = CreditAccount::new(8);
        account.grant(2, 0); // balance 3
        let (granted, complete) = account.request(10).await;
        assert_eq!(granted, 3);
        assert!(!complete);
        assert_eq!(account.balance(), 0);
    }

    #[tokio::test]
    async fn short_grant_replenishes_opening() {
        let account = CreditAccount::new(4);
        account.opening();
        account.grant(1, 5);
        assert_eq!(account.opening(), 4);
    }

    #[tokio::test]
    async fn request_blocks_until_granted() {
        let account = Arc::new(CreditAccount::new(16));
        let (granted, _) = account.request(1).await;
        assert_eq!(granted, 1);
        assert_eq!(account.balance(), 0);

        let waiter = {
            let account = account.clone();
            tokio::spawn(async move { account.request(2).await })
        };
        // the waiter cannot make progress on an empty ledger
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        account.grant(3, 1);
        let (granted, complete) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(granted, 2);
        assert!(complete);
        assert_eq!(account.balance(), 1);
    }

    #[tokio::test]
    async fn zero_grant_still_floors_the_balance() {
        let account = CreditAccount::new(2);
        let (_, _) = account.request(1).await;
        assert_eq!(account.balance(), 0);
        account.grant(0, 1);
        assert_eq!(account.balance(), 1);
    }
}
