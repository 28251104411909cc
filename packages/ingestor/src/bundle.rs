//! Transaction Bundle
//!
//! One unit of filtering work: the transactions of a mempool delivery or of a
//! newly connected block, in the order they were observed.

use crate::decoder::Transaction;

/// Ordered, mutable collection of transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    transactions: Vec<Transaction>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bundle from a block's transaction list
    pub fn from_block(block: &bitcoin::Block) -> Self {
        block.txdata.iter().map(Transaction::from).collect()
    }

    /// Append a transaction; `None` is ignored
    pub fn add(&mut self, tx: impl Into<Option<Transaction>>) {
        if let Some(tx) = tx.into() {
            self.transactions.push(tx);
        }
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Copy of the current contents, in order
    pub fn to_vec(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn as_slice(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl FromIterator<Transaction> for Bundle {
    fn from_iter<T: IntoIterator<Item = Transaction>>(iter: T) -> Self {
        Self {
            transactions: iter.into_iter().collect(),
        }
    }
}

impl Extend<Transaction> for Bundle {
    fn extend<T: IntoIterator<Item = Transaction>>(&mut self, iter: T) {
        self.transactions.extend(iter);
    }
}
