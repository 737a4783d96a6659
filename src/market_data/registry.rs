use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::engine::book::OrderBookSnapshot;
use crate::market_data::events::ContractType;

pub type SharedBook = Arc<Mutex<OrderBookSnapshot>>;

/// Instrument id -> book. Owns identity and lifetime only, no diff logic.
///
/// One instance is created per process (or per test) and handed to every
/// session that should share it. Books are created on first use and live as
/// long as the registry; reconnects never replace them.
#[derive(Debug, Default)]
pub struct InstrumentBookRegistry {
    books: RwLock<AHashMap<String, SharedBook>>,
}

impl InstrumentBookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same id, same `Arc`, no matter how many threads race on first use.
    pub fn get_or_create(&self, instrument_id: &str, contract_type: &ContractType) -> SharedBook {
        if let Some(book) = self.books.read().get(instrument_id) {
            return Arc::clone(book);
        }
        let mut books = self.books.write();
        // another writer may have won while we waited for the lock
        let book = books.entry(instrument_id.to_string()).or_insert_with(|| {
            debug!(instrument = instrument_id, %contract_type, "creating order book");
            Arc::new(Mutex::new(OrderBookSnapshot::new(instrument_id, contract_type.clone())))
        });
        Arc::clone(book)
    }

    pub fn get(&self, instrument_id: &str) -> Option<SharedBook> {
        self.books.read().get(instrument_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    pub fn instrument_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.books.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Flag every book as possibly gapped. Called when the transport
    /// reconnects; the next full snapshot for a book clears its flag.
    pub fn mark_all_stale(&self) -> usize {
        let books = self.books.read();
        for book in books.values() {
            book.lock().mark_stale();
        }
        if !books.is_empty() {
            info!(books = books.len(), "marked books possibly stale after reconnect");
        }
        books.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn known_id_returns_same_book() {
        let registry = InstrumentBookRegistry::new();
        let a = registry.get_or_create("BTC-USDT", &ContractType::Spot);
        let b = registry.get_or_create("BTC-USDT", &ContractType::Spot);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ETH-USDT").is_none());
    }

    #[test]
    fn concurrent_first_use_creates_one_book() {
        let registry = Arc::new(InstrumentBookRegistry::new());
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("BTC-USDT-SWAP", &ContractType::Swap)
                })
            })
            .collect();

        let books: Vec<SharedBook> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for book in &books[1..] {
            assert!(Arc::ptr_eq(&books[0], book));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mark_all_stale_touches_every_book() {
        let registry = InstrumentBookRegistry::new();
        registry.get_or_create("A-B", &ContractType::Spot);
        registry.get_or_create("C-D", &ContractType::Spot);
        assert_eq!(registry.mark_all_stale(), 2);
        for id in registry.instrument_ids() {
            assert!(registry.get(&id).unwrap().lock().is_possibly_stale());
        }
    }
}
