use crate::domain::job::DeadLetter;
use crate::domain::order::{Order, OrderId, OrderStatus, OrderedProduct};
use crate::domain::payment::Payment;
use crate::domain::ports::{Catalog, DeadLetterStore, OrderStore, PaymentStore};
use crate::domain::product::{Product, ProductId};
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for order headers, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for order lines, keyed by order id then line id.
pub const CF_ORDERED_PRODUCTS: &str = "ordered_products";
pub const CF_PAYMENTS: &str = "payments";
/// Unique index: checkout session id to payment id.
pub const CF_PAYMENTS_BY_SESSION: &str = "payments_by_session";
pub const CF_PAYMENTS_BY_INTENT: &str = "payments_by_intent";
pub const CF_PRODUCTS: &str = "products";
pub const CF_DEAD_LETTERS: &str = "dead_letters";
/// Id sequences.
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 8] = [
    CF_ORDERS,
    CF_ORDERED_PRODUCTS,
    CF_PAYMENTS,
    CF_PAYMENTS_BY_SESSION,
    CF_PAYMENTS_BY_INTENT,
    CF_PRODUCTS,
    CF_DEAD_LETTERS,
    CF_META,
];

/// A persistent store implementation using RocksDB.
///
/// Implements every storage port over one database with a column family per
/// table. Values are JSON; integer keys are big-endian so iteration follows
/// id order.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
/// Read-modify-write sequences are serialized by an internal mutex.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ServiceError::Persistence(format!("column family {name} not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let mode = IteratorMode::From(prefix, Direction::Forward);
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    /// Must be called with `write_lock` held.
    fn next_id(&self, sequence: &str) -> Result<i64> {
        let meta = self.cf(CF_META)?;
        let current = match self.db.get_cf(meta, sequence.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    ServiceError::Persistence(format!("corrupt sequence {sequence}"))
                })?;
                i64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(meta, sequence.as_bytes(), next.to_be_bytes())?;
        Ok(next)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ServiceError::Persistence(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ServiceError::Persistence(format!("Deserialization error: {e}")))
}

fn line_key(order_id: OrderId, line_id: i64) -> Vec<u8> {
    let mut key = order_id.to_be_bytes().to_vec();
    key.extend_from_slice(&line_id.to_be_bytes());
    key
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert_order(&self, mut order: Order) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        order.id = self.next_id(CF_ORDERS)?;
        self.db
            .put_cf(self.cf(CF_ORDERS)?, order.id.to_be_bytes(), encode(&order)?)?;
        Ok(order)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stored: Order = self
            .get_json(CF_ORDERS, &order.id.to_be_bytes())?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order.id)))?;
        stored.user_id = order.user_id;
        stored.total_price = order.total_price;
        stored.delivery_info = order.delivery_info.clone();
        stored.updated_at = order.updated_at;
        self.db
            .put_cf(self.cf(CF_ORDERS)?, order.id.to_be_bytes(), encode(&stored)?)?;
        Ok(())
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stored: Order = self
            .get_json(CF_ORDERS, &order_id.to_be_bytes())?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;
        stored.status = status;
        stored.updated_at = updated_at;
        self.db
            .put_cf(self.cf(CF_ORDERS)?, order_id.to_be_bytes(), encode(&stored)?)?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, &order_id.to_be_bytes())
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_ORDERS)?, order_id.to_be_bytes())?;
        Ok(())
    }

    async fn insert_lines(&self, lines: Vec<OrderedProduct>) -> Result<Vec<OrderedProduct>> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_ORDERED_PRODUCTS)?;
        let mut inserted = Vec::with_capacity(lines.len());
        for mut line in lines {
            line.id = self.next_id(CF_ORDERED_PRODUCTS)?;
            self.db
                .put_cf(cf, line_key(line.order_id, line.id), encode(&line)?)?;
            inserted.push(line);
        }
        Ok(inserted)
    }

    async fn delete_lines(&self, order_id: OrderId) -> Result<()> {
        let cf = self.cf(CF_ORDERED_PRODUCTS)?;
        let prefix = order_id.to_be_bytes();
        let mut batch = WriteBatch::default();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn lines(&self, order_id: OrderId) -> Result<Vec<OrderedProduct>> {
        self.scan_json(CF_ORDERED_PRODUCTS, &order_id.to_be_bytes())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert_payment(&self, mut payment: Payment) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let by_session = self.cf(CF_PAYMENTS_BY_SESSION)?;
        if self
            .db
            .get_pinned_cf(by_session, payment.checkout_session_id.as_bytes())?
            .is_some()
        {
            return Err(ServiceError::Persistence(format!(
                "duplicate checkout session id {}",
                payment.checkout_session_id
            )));
        }
        payment.id = self.next_id(CF_PAYMENTS)?;
        let key = payment.id.to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYMENTS)?, key, encode(&payment)?);
        batch.put_cf(by_session, payment.checkout_session_id.as_bytes(), key);
        if let Some(intent) = &payment.payment_intent_id {
            batch.put_cf(self.cf(CF_PAYMENTS_BY_INTENT)?, intent.as_bytes(), key);
        }
        self.db.write(batch)?;
        Ok(payment)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = payment.id.to_be_bytes();
        let stored: Payment = self
            .get_json(CF_PAYMENTS, &key)?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {}", payment.id)))?;
        if stored.checkout_session_id != payment.checkout_session_id {
            return Err(ServiceError::Persistence(format!(
                "checkout session id of payment {} is immutable",
                payment.id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYMENTS)?, key, encode(payment)?);
        if let Some(intent) = &payment.payment_intent_id {
            batch.put_cf(self.cf(CF_PAYMENTS_BY_INTENT)?, intent.as_bytes(), key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Payment>> {
        let Some(id) = self
            .db
            .get_cf(self.cf(CF_PAYMENTS_BY_SESSION)?, session_id.as_bytes())?
        else {
            return Ok(None);
        };
        self.get_json(CF_PAYMENTS, &id)
    }

    async fn find_by_intent(&self, payment_intent_id: &str) -> Result<Option<Payment>> {
        let Some(id) = self
            .db
            .get_cf(self.cf(CF_PAYMENTS_BY_INTENT)?, payment_intent_id.as_bytes())?
        else {
            return Ok(None);
        };
        self.get_json(CF_PAYMENTS, &id)
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        Ok(self
            .all_payments()
            .await?
            .into_iter()
            .filter(|p| p.order_id == order_id)
            .collect())
    }

    async fn all_payments(&self) -> Result<Vec<Payment>> {
        self.scan_json(CF_PAYMENTS, &[])
    }
}

#[async_trait]
impl Catalog for RocksDBStore {
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let cf = self.cf(CF_PRODUCTS)?;
        let keys = ids.iter().map(|id| (cf, id.to_be_bytes()));
        let mut found = Vec::new();
        for value in self.db.multi_get_cf(keys) {
            if let Some(bytes) = value? {
                found.push(decode(&bytes)?);
            }
        }
        Ok(found)
    }

    async fn put_product(&self, product: Product) -> Result<()> {
        self.db
            .put_cf(self.cf(CF_PRODUCTS)?, product.id.to_be_bytes(), encode(&product)?)?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for RocksDBStore {
    async fn push(&self, letter: DeadLetter) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let id = self.next_id(CF_DEAD_LETTERS)?;
        self.db
            .put_cf(self.cf(CF_DEAD_LETTERS)?, id.to_be_bytes(), encode(&letter)?)?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<DeadLetter>> {
        self.scan_json(CF_DEAD_LETTERS, &[])
    }
}
