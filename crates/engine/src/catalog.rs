use boostline_types::Coins;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::validator::ValidationError;

/// Live unit price. Orders read it once at submission and keep that price.
#[derive(Debug, Clone)]
pub struct PriceCatalog {
    price: Arc<watch::Sender<Coins>>,
}

impl PriceCatalog {
    pub fn new(unit_price: Coins) -> Self {
        let (tx, _rx) = watch::channel(unit_price);
        Self { price: Arc::new(tx) }
    }

    pub fn unit_price(&self) -> Coins {
        *self.price.borrow()
    }

    pub fn set_unit_price(&self, unit_price: Coins) -> Result<(), ValidationError> {
        if unit_price == 0 {
            return Err(ValidationError::ZeroPrice);
        }

        let previous = self.price.send_replace(unit_price);
        if previous != unit_price {
            info!(previous, unit_price, "Unit price changed");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<Coins> {
        self.price.subscribe()
    }
}

impl Default for PriceCatalog {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_price_updates_are_published() {
        let catalog = PriceCatalog::new(10);
        let mut rx = catalog.subscribe();

        catalog.set_unit_price(12).unwrap();
        rx.changed().await.unwrap();

        assert_eq!(*rx.borrow(), 12);
        assert_eq!(catalog.unit_price(), 12);
    }

    #[test]
    fn test_zero_price_rejected() {
        let catalog = PriceCatalog::new(10);
        assert_eq!(catalog.set_unit_price(0), Err(ValidationError::ZeroPrice));
        assert_eq!(catalog.unit_price(), 10);
    }

    #[test]
    fn test_clones_share_price() {
        let catalog = PriceCatalog::new(10);
        let clone = catalog.clone();
        clone.set_unit_price(7).unwrap();
        assert_eq!(catalog.unit_price(), 7);
    }
}
