//! Postgres-backed ledger store.
//!
//! Every mutation runs inside one `sqlx` transaction. Locking reads use
//! `SELECT ... FOR UPDATE`, so two units of work touching the same product,
//! order or customer row serialize on that row for the rest of the
//! transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `40001` | `Conflict` | Serialization failure |
//! | Database | `40P01` | `Conflict` | Deadlock detected |
//! | Database | `55P03` | `Conflict` | Lock not available (lock timeout) |
//! | Database | `23505` | `Conflict` | Unique violation (lost race on sku / document number) |
//! | Database | Any other | `Backend` | Constraint or statement error |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` | Connection trouble |
//! | Other | N/A | `Backend` | Anything else |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{
    AggregateId, DocumentKind, DocumentNumber, Money, OrderTotals, Percent, UserId,
};
use stockledger_inventory::{
    InventoryMovement, MovementFilter, MovementType, ProductId, ProductSnapshot, ReferenceType,
};
use stockledger_invoicing::{InvoiceId, InvoiceItem, InvoiceSnapshot};
use stockledger_parties::{ContactInfo, CustomerId, CustomerSnapshot, Vendor, VendorId};
use stockledger_payments::{Payment, PaymentMode, PaymentState, PaymentStatus};
use stockledger_purchasing::{OrderStatus, PurchaseId, PurchaseItem, PurchaseSnapshot};

use super::r#trait::{LedgerStore, LedgerTx, MovementPage, MovementRow, Pagination, StoreError};

/// Idempotent DDL for the ledger tables.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vendors (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        sku TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        purchase_price_cents BIGINT NOT NULL,
        selling_price_cents BIGINT NOT NULL,
        reorder_level BIGINT NOT NULL,
        max_stock BIGINT NOT NULL,
        vendor_id UUID REFERENCES vendors(id),
        active BOOLEAN NOT NULL,
        version BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        outstanding_balance_cents BIGINT NOT NULL DEFAULT 0,
        version BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchases (
        id UUID PRIMARY KEY,
        purchase_number TEXT NOT NULL UNIQUE,
        vendor_id UUID NOT NULL REFERENCES vendors(id),
        vendor_invoice_number TEXT,
        purchase_date DATE NOT NULL,
        payment_due_date DATE,
        subtotal_cents BIGINT NOT NULL,
        tax_rate_bp INTEGER NOT NULL,
        tax_amount_cents BIGINT NOT NULL,
        discount_rate_bp INTEGER NOT NULL,
        discount_amount_cents BIGINT NOT NULL,
        shipping_cost_cents BIGINT NOT NULL,
        total_amount_cents BIGINT NOT NULL,
        amount_paid_cents BIGINT NOT NULL,
        payment_status TEXT NOT NULL CHECK (payment_status IN ('pending', 'partial', 'paid')),
        payment_mode TEXT,
        order_status TEXT NOT NULL,
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_items (
        purchase_id UUID NOT NULL REFERENCES purchases(id) ON DELETE CASCADE,
        line_no INTEGER NOT NULL,
        product_id UUID NOT NULL REFERENCES products(id),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        purchase_price_cents BIGINT NOT NULL,
        total_cents BIGINT NOT NULL,
        PRIMARY KEY (purchase_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id UUID PRIMARY KEY,
        invoice_number TEXT NOT NULL UNIQUE,
        customer_id UUID REFERENCES customers(id),
        invoice_date DATE NOT NULL,
        due_date DATE NOT NULL,
        subtotal_cents BIGINT NOT NULL,
        tax_rate_bp INTEGER NOT NULL,
        tax_amount_cents BIGINT NOT NULL,
        discount_rate_bp INTEGER NOT NULL,
        discount_amount_cents BIGINT NOT NULL,
        shipping_cost_cents BIGINT NOT NULL,
        total_amount_cents BIGINT NOT NULL,
        amount_paid_cents BIGINT NOT NULL,
        payment_status TEXT NOT NULL CHECK (payment_status IN ('pending', 'partial', 'paid')),
        payment_mode TEXT NOT NULL,
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoice_items (
        invoice_id UUID NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
        line_no INTEGER NOT NULL,
        product_id UUID NOT NULL REFERENCES products(id),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        unit_price_cents BIGINT NOT NULL,
        discount_cents BIGINT NOT NULL,
        total_cents BIGINT NOT NULL,
        PRIMARY KEY (invoice_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id UUID PRIMARY KEY,
        order_kind TEXT NOT NULL CHECK (order_kind IN ('purchase', 'invoice')),
        order_id UUID NOT NULL,
        payment_date DATE NOT NULL,
        amount_cents BIGINT NOT NULL CHECK (amount_cents > 0),
        mode TEXT NOT NULL,
        reference_no TEXT,
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS payments_order_idx ON payments (order_kind, order_id)",
    r#"
    CREATE TABLE IF NOT EXISTS inventory_movements (
        id UUID PRIMARY KEY,
        product_id UUID NOT NULL REFERENCES products(id),
        movement_type TEXT NOT NULL CHECK (movement_type IN ('stock_in', 'stock_out')),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        reference_type TEXT NOT NULL,
        reference_id UUID,
        previous_quantity BIGINT NOT NULL,
        new_quantity BIGINT NOT NULL CHECK (new_quantity >= 0),
        notes TEXT,
        created_by UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS inventory_movements_product_idx ON inventory_movements (product_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS document_counters (
        prefix TEXT NOT NULL,
        year INTEGER NOT NULL,
        last_value INTEGER NOT NULL,
        PRIMARY KEY (prefix, year)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id UUID PRIMARY KEY,
        actor UUID NOT NULL,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id UUID NOT NULL,
        old_value JSONB,
        new_value JSONB,
        ip_address TEXT,
        user_agent TEXT,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

const PRODUCT_COLUMNS: &str = "id, sku, name, quantity, purchase_price_cents, selling_price_cents, \
     reorder_level, max_stock, vendor_id, active, version";

const CUSTOMER_COLUMNS: &str =
    "id, name, email, phone, address, outstanding_balance_cents, version";

const TOTALS_COLUMNS: &str = "subtotal_cents, tax_rate_bp, tax_amount_cents, discount_rate_bp, \
     discount_amount_cents, shipping_cost_cents, total_amount_cents";

const MOVEMENT_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR m.product_id = $1)
      AND ($2::text IS NULL OR m.movement_type = $2)
      AND ($3::text IS NULL OR m.reference_type = $3)
      AND ($4::uuid IS NULL OR m.reference_id = $4)
      AND ($5::timestamptz IS NULL OR m.created_at >= $5)
      AND ($6::timestamptz IS NULL OR m.created_at <= $6)
"#;

fn lock_clause(lock: bool) -> &'static str {
    if lock { " FOR UPDATE" } else { "" }
}

/// Postgres-backed ledger store.
///
/// Uses a SQLx connection pool (thread-safe, `Send + Sync`). Units of work
/// run at the default READ COMMITTED isolation; correctness comes from the
/// row locks every mutating path takes before it reads a row it will write.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx { tx })
    }

    async fn product(&self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_product(&mut conn, id, false).await
    }

    async fn purchase(&self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_purchase(&mut conn, id, false).await
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_invoice(&mut conn, id, false).await
    }

    async fn customer(&self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_customer(&mut conn, id, false).await
    }

    async fn payments(
        &self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_payments(&mut conn, kind, order_id).await
    }

    #[instrument(
        skip(self, filter),
        fields(page = pagination.page, limit = pagination.limit, row_count = tracing::field::Empty),
        err
    )]
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let span = Span::current();
        let mut conn = self.acquire().await?;

        let product_id = filter.product_id.map(|id| *id.as_uuid());
        let movement_type = filter.movement_type.map(MovementType::as_str);
        let reference_type = filter.reference_type.map(ReferenceType::as_str);
        let reference_id = filter.reference_id.map(|id| *id.as_uuid());

        let count_sql = format!("SELECT COUNT(*) FROM inventory_movements m {MOVEMENT_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(product_id)
            .bind(movement_type)
            .bind(reference_type)
            .bind(reference_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?;

        let page_sql = format!(
            r#"
            SELECT m.id, m.product_id, m.movement_type, m.quantity, m.reference_type,
                   m.reference_id, m.previous_quantity, m.new_quantity, m.notes,
                   m.created_by, m.created_at, p.name AS product_name, p.sku
            FROM inventory_movements m
            JOIN products p ON p.id = m.product_id
            {MOVEMENT_FILTER}
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT $7 OFFSET $8
            "#
        );
        let rows = sqlx::query(&page_sql)
            .bind(product_id)
            .bind(movement_type)
            .bind(reference_type)
            .bind(reference_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(i64::from(pagination.limit))
            .bind(pagination.offset() as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(MovementRow {
                movement: movement_from_row(row)?,
                product_name: get(row, "product_name")?,
                sku: get(row, "sku")?,
            });
        }

        span.record("row_count", out.len());
        Ok(MovementPage::new(out, pagination, total.max(0) as u64))
    }

    async fn low_stock(&self) -> Result<Vec<ProductSnapshot>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE active AND quantity <= reorder_level"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("low_stock", e))?;
        rows.iter().map(product_from_row).collect()
    }
}

/// Unit of work over [`PostgresLedgerStore`]. Dropping it rolls back.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PostgresTx {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError> {
        fetch_product(&mut self.tx, id, true).await
    }

    async fn product_id_by_sku(&mut self, sku: &str) -> Result<Option<ProductId>, StoreError> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product_id_by_sku", e))?;
        Ok(id.map(ProductId::from))
    }

    async fn insert_product(&mut self, p: &ProductSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, quantity, purchase_price_cents, selling_price_cents,
                reorder_level, max_stock, vendor_id, active, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(&p.sku)
        .bind(&p.name)
        .bind(p.quantity)
        .bind(p.purchase_price.cents())
        .bind(p.selling_price.cents())
        .bind(p.reorder_level)
        .bind(p.max_stock)
        .bind(p.vendor_id.map(|v| *v.as_uuid()))
        .bind(p.active)
        .bind(p.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn update_product(&mut self, p: &ProductSnapshot) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, quantity = $3, purchase_price_cents = $4, selling_price_cents = $5,
                reorder_level = $6, max_stock = $7, vendor_id = $8, active = $9, version = $10,
                sku = $11
            WHERE id = $1
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(&p.name)
        .bind(p.quantity)
        .bind(p.purchase_price.cents())
        .bind(p.selling_price.cents())
        .bind(p.reorder_level)
        .bind(p.max_stock)
        .bind(p.vendor_id.map(|v| *v.as_uuid()))
        .bind(p.active)
        .bind(p.version as i64)
        .bind(&p.sku)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;
        expect_one_row(result.rows_affected(), "product", p.id)
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM inventory_movements WHERE product_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        expect_one_row(result.rows_affected(), "product", id)
    }

    async fn product_line_references(&mut self, id: ProductId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM invoice_items WHERE product_id = $1)
                 + (SELECT COUNT(*) FROM purchase_items WHERE product_id = $1)
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("product_line_references", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn append_movement(&mut self, m: &InventoryMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, product_id, movement_type, quantity, reference_type, reference_id,
                previous_quantity, new_quantity, notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(m.id)
        .bind(m.product_id.as_uuid())
        .bind(m.movement_type.as_str())
        .bind(m.quantity)
        .bind(m.reference_type.as_str())
        .bind(m.reference_id.map(|id| *id.as_uuid()))
        .bind(m.previous_quantity)
        .bind(m.new_quantity)
        .bind(&m.notes)
        .bind(m.created_by.as_uuid())
        .bind(m.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;
        Ok(())
    }

    async fn lock_purchase(&mut self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError> {
        fetch_purchase(&mut self.tx, id, true).await
    }

    #[instrument(skip(self, p), fields(purchase_id = %p.id, items = p.items.len()), err)]
    async fn insert_purchase(&mut self, p: &PurchaseSnapshot) -> Result<(), StoreError> {
        let t = &p.totals;
        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, purchase_number, vendor_id, vendor_invoice_number, purchase_date,
                payment_due_date, subtotal_cents, tax_rate_bp, tax_amount_cents,
                discount_rate_bp, discount_amount_cents, shipping_cost_cents,
                total_amount_cents, amount_paid_cents, payment_status, payment_mode,
                order_status, notes, created_by, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(p.purchase_number.to_string())
        .bind(p.vendor_id.as_uuid())
        .bind(&p.vendor_invoice_number)
        .bind(p.purchase_date)
        .bind(p.payment_due_date)
        .bind(t.subtotal.cents())
        .bind(t.tax_rate.basis_points() as i32)
        .bind(t.tax_amount.cents())
        .bind(t.discount_rate.basis_points() as i32)
        .bind(t.discount_amount.cents())
        .bind(t.shipping_cost.cents())
        .bind(t.total_amount.cents())
        .bind(p.payment.amount_paid.cents())
        .bind(p.payment.status.as_str())
        .bind(p.payment_mode.map(PaymentMode::as_str))
        .bind(p.order_status.as_str())
        .bind(&p.notes)
        .bind(p.created_by.as_uuid())
        .bind(p.created_at)
        .bind(p.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase", e))?;

        for item in &p.items {
            sqlx::query(
                r#"
                INSERT INTO purchase_items (
                    purchase_id, line_no, product_id, quantity, purchase_price_cents, total_cents
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(p.id.as_uuid())
            .bind(item.line_no as i32)
            .bind(item.product_id.as_uuid())
            .bind(item.quantity)
            .bind(item.purchase_price.cents())
            .bind(item.total.cents())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_purchase_item", e))?;
        }
        Ok(())
    }

    async fn update_purchase(&mut self, p: &PurchaseSnapshot) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET amount_paid_cents = $2, payment_status = $3, payment_mode = $4,
                order_status = $5, version = $6
            WHERE id = $1
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(p.payment.amount_paid.cents())
        .bind(p.payment.status.as_str())
        .bind(p.payment_mode.map(PaymentMode::as_str))
        .bind(p.order_status.as_str())
        .bind(p.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase", e))?;
        expect_one_row(result.rows_affected(), "purchase", p.id)
    }

    async fn delete_purchase(&mut self, id: PurchaseId) -> Result<(), StoreError> {
        // Items go with the header (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM purchases WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_purchase", e))?;
        expect_one_row(result.rows_affected(), "purchase", id)
    }

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError> {
        fetch_invoice(&mut self.tx, id, true).await
    }

    #[instrument(skip(self, i), fields(invoice_id = %i.id, items = i.items.len()), err)]
    async fn insert_invoice(&mut self, i: &InvoiceSnapshot) -> Result<(), StoreError> {
        let t = &i.totals;
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, customer_id, invoice_date, due_date, subtotal_cents,
                tax_rate_bp, tax_amount_cents, discount_rate_bp, discount_amount_cents,
                shipping_cost_cents, total_amount_cents, amount_paid_cents, payment_status,
                payment_mode, notes, created_by, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19)
            "#,
        )
        .bind(i.id.as_uuid())
        .bind(i.invoice_number.to_string())
        .bind(i.customer_id.map(|c| *c.as_uuid()))
        .bind(i.invoice_date)
        .bind(i.due_date)
        .bind(t.subtotal.cents())
        .bind(t.tax_rate.basis_points() as i32)
        .bind(t.tax_amount.cents())
        .bind(t.discount_rate.basis_points() as i32)
        .bind(t.discount_amount.cents())
        .bind(t.shipping_cost.cents())
        .bind(t.total_amount.cents())
        .bind(i.payment.amount_paid.cents())
        .bind(i.payment.status.as_str())
        .bind(i.payment_mode.as_str())
        .bind(&i.notes)
        .bind(i.created_by.as_uuid())
        .bind(i.created_at)
        .bind(i.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;

        for item in &i.items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    invoice_id, line_no, product_id, quantity, unit_price_cents,
                    discount_cents, total_cents
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(i.id.as_uuid())
            .bind(item.line_no as i32)
            .bind(item.product_id.as_uuid())
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .bind(item.discount.cents())
            .bind(item.total.cents())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_invoice_item", e))?;
        }
        Ok(())
    }

    async fn update_invoice(&mut self, i: &InvoiceSnapshot) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid_cents = $2, payment_status = $3, payment_mode = $4, version = $5
            WHERE id = $1
            "#,
        )
        .bind(i.id.as_uuid())
        .bind(i.payment.amount_paid.cents())
        .bind(i.payment.status.as_str())
        .bind(i.payment_mode.as_str())
        .bind(i.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;
        expect_one_row(result.rows_affected(), "invoice", i.id)
    }

    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invoice", e))?;
        expect_one_row(result.rows_affected(), "invoice", id)
    }

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError> {
        fetch_customer(&mut self.tx, id, true).await
    }

    async fn lock_all_customers(&mut self) -> Result<Vec<CustomerSnapshot>, StoreError> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY id FOR UPDATE");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_all_customers", e))?;
        rows.iter().map(customer_from_row).collect()
    }

    async fn insert_customer(&mut self, c: &CustomerSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, name, email, phone, address, outstanding_balance_cents, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(c.id.as_uuid())
        .bind(&c.name)
        .bind(&c.contact.email)
        .bind(&c.contact.phone)
        .bind(&c.contact.address)
        .bind(c.outstanding_balance.cents())
        .bind(c.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_customer", e))?;
        Ok(())
    }

    async fn update_customer(&mut self, c: &CustomerSnapshot) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET name = $2, email = $3, phone = $4, address = $5,
                outstanding_balance_cents = $6, version = $7
            WHERE id = $1
            "#,
        )
        .bind(c.id.as_uuid())
        .bind(&c.name)
        .bind(&c.contact.email)
        .bind(&c.contact.phone)
        .bind(&c.contact.address)
        .bind(c.outstanding_balance.cents())
        .bind(c.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_customer", e))?;
        expect_one_row(result.rows_affected(), "customer", c.id)
    }

    async fn outstanding_by_customer(&mut self) -> Result<HashMap<CustomerId, Money>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, SUM(GREATEST(total_amount_cents - amount_paid_cents, 0))::BIGINT AS outstanding
            FROM invoices
            WHERE customer_id IS NOT NULL AND payment_status <> 'paid'
            GROUP BY customer_id
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("outstanding_by_customer", e))?;

        let mut sums = HashMap::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = get(row, "customer_id")?;
            let cents: i64 = get(row, "outstanding")?;
            sums.insert(CustomerId::from(id), Money::from_cents(cents));
        }
        Ok(sums)
    }

    async fn vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, phone, address, active, created_by, created_at
            FROM vendors
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("vendor", e))?;

        row.map(|row| {
            Ok(Vendor {
                id: VendorId::from(get::<Uuid>(&row, "id")?),
                name: get(&row, "name")?,
                contact: contact_from_row(&row)?,
                active: get(&row, "active")?,
                created_by: UserId::from(get::<Uuid>(&row, "created_by")?),
                created_at: get(&row, "created_at")?,
            })
        })
        .transpose()
    }

    async fn insert_vendor(&mut self, v: &Vendor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO vendors (id, name, email, phone, address, active, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(v.id.as_uuid())
        .bind(&v.name)
        .bind(&v.contact.email)
        .bind(&v.contact.phone)
        .bind(&v.contact.address)
        .bind(v.active)
        .bind(v.created_by.as_uuid())
        .bind(v.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_vendor", e))?;
        Ok(())
    }

    async fn payments_for(
        &mut self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError> {
        fetch_payments(&mut self.tx, kind, order_id).await
    }

    async fn insert_payment(&mut self, p: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_kind, order_id, payment_date, amount_cents, mode,
                reference_no, notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(p.id.as_uuid())
        .bind(p.order_kind.as_str())
        .bind(p.order_id.as_uuid())
        .bind(p.payment_date)
        .bind(p.amount.cents())
        .bind(p.mode.as_str())
        .bind(&p.reference_no)
        .bind(&p.notes)
        .bind(p.created_by.as_uuid())
        .bind(p.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn next_document_sequence(
        &mut self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<u32, StoreError> {
        // The upsert takes the counter row lock, so concurrent creators queue
        // here instead of reading the same maximum.
        let value: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO document_counters (prefix, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year)
            DO UPDATE SET last_value = document_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(kind.prefix())
        .bind(year)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_document_sequence", e))?;

        u32::try_from(value)
            .map_err(|_| StoreError::Corrupt(format!("document counter {value} is negative")))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn expect_one_row(affected: u64, what: &str, id: impl std::fmt::Display) -> Result<(), StoreError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(StoreError::Backend(format!("{what} {id}: expected 1 row, touched {affected}")))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    get::<i64>(row, column).map(Money::from_cents)
}

fn percent(row: &PgRow, column: &str) -> Result<Percent, StoreError> {
    let bp: i32 = get(row, column)?;
    u32::try_from(bp)
        .map(Percent::from_basis_points)
        .map_err(|_| StoreError::Corrupt(format!("column {column}: negative rate {bp}")))
}

fn version(row: &PgRow) -> Result<u64, StoreError> {
    let v: i64 = get(row, "version")?;
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative version {v}")))
}

fn parse_column<T>(
    row: &PgRow,
    column: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, StoreError> {
    let raw: String = get(row, column)?;
    parse(&raw).ok_or_else(|| StoreError::Corrupt(format!("column {column}: unknown value {raw:?}")))
}

fn contact_from_row(row: &PgRow) -> Result<ContactInfo, StoreError> {
    Ok(ContactInfo {
        email: get(row, "email")?,
        phone: get(row, "phone")?,
        address: get(row, "address")?,
    })
}

fn totals_from_row(row: &PgRow) -> Result<OrderTotals, StoreError> {
    Ok(OrderTotals {
        subtotal: money(row, "subtotal_cents")?,
        tax_rate: percent(row, "tax_rate_bp")?,
        tax_amount: money(row, "tax_amount_cents")?,
        discount_rate: percent(row, "discount_rate_bp")?,
        discount_amount: money(row, "discount_amount_cents")?,
        shipping_cost: money(row, "shipping_cost_cents")?,
        total_amount: money(row, "total_amount_cents")?,
    })
}

fn payment_state_from_row(row: &PgRow) -> Result<PaymentState, StoreError> {
    Ok(PaymentState {
        amount_paid: money(row, "amount_paid_cents")?,
        status: parse_column(row, "payment_status", PaymentStatus::parse)?,
    })
}

fn product_from_row(row: &PgRow) -> Result<ProductSnapshot, StoreError> {
    Ok(ProductSnapshot {
        id: ProductId::from(get::<Uuid>(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        quantity: get(row, "quantity")?,
        purchase_price: money(row, "purchase_price_cents")?,
        selling_price: money(row, "selling_price_cents")?,
        reorder_level: get(row, "reorder_level")?,
        max_stock: get(row, "max_stock")?,
        vendor_id: get::<Option<Uuid>>(row, "vendor_id")?.map(VendorId::from),
        active: get(row, "active")?,
        version: version(row)?,
    })
}

fn customer_from_row(row: &PgRow) -> Result<CustomerSnapshot, StoreError> {
    Ok(CustomerSnapshot {
        id: CustomerId::from(get::<Uuid>(row, "id")?),
        name: get(row, "name")?,
        contact: contact_from_row(row)?,
        outstanding_balance: money(row, "outstanding_balance_cents")?,
        version: version(row)?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<InventoryMovement, StoreError> {
    Ok(InventoryMovement {
        id: get(row, "id")?,
        product_id: ProductId::from(get::<Uuid>(row, "product_id")?),
        movement_type: parse_column(row, "movement_type", MovementType::parse)?,
        quantity: get(row, "quantity")?,
        reference_type: parse_column(row, "reference_type", ReferenceType::parse)?,
        reference_id: get::<Option<Uuid>>(row, "reference_id")?.map(AggregateId::from_uuid),
        previous_quantity: get(row, "previous_quantity")?,
        new_quantity: get(row, "new_quantity")?,
        notes: get(row, "notes")?,
        created_by: UserId::from(get::<Uuid>(row, "created_by")?),
        created_at: get(row, "created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let kind = parse_column(row, "order_kind", |s| match s {
        "purchase" => Some(DocumentKind::Purchase),
        "invoice" => Some(DocumentKind::Invoice),
        _ => None,
    })?;
    Ok(Payment {
        id: get::<Uuid>(row, "id")?.into(),
        order_kind: kind,
        order_id: AggregateId::from_uuid(get(row, "order_id")?),
        payment_date: get(row, "payment_date")?,
        amount: money(row, "amount_cents")?,
        mode: parse_column(row, "mode", |s| s.parse::<PaymentMode>().ok())?,
        reference_no: get(row, "reference_no")?,
        notes: get(row, "notes")?,
        created_by: UserId::from(get::<Uuid>(row, "created_by")?),
        created_at: get(row, "created_at")?,
    })
}

async fn fetch_product(
    conn: &mut PgConnection,
    id: ProductId,
    lock: bool,
) -> Result<Option<ProductSnapshot>, StoreError> {
    let sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_product", e))?;
    row.as_ref().map(product_from_row).transpose()
}

async fn fetch_customer(
    conn: &mut PgConnection,
    id: CustomerId,
    lock: bool,
) -> Result<Option<CustomerSnapshot>, StoreError> {
    let sql = format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1{}",
        lock_clause(lock)
    );
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_customer", e))?;
    row.as_ref().map(customer_from_row).transpose()
}

async fn fetch_purchase(
    conn: &mut PgConnection,
    id: PurchaseId,
    lock: bool,
) -> Result<Option<PurchaseSnapshot>, StoreError> {
    let sql = format!(
        r#"
        SELECT id, purchase_number, vendor_id, vendor_invoice_number, purchase_date,
               payment_due_date, {TOTALS_COLUMNS}, amount_paid_cents, payment_status,
               payment_mode, order_status, notes, created_by, created_at, version
        FROM purchases
        WHERE id = $1{}
        "#,
        lock_clause(lock)
    );
    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_purchase", e))?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        r#"
        SELECT line_no, product_id, quantity, purchase_price_cents, total_cents
        FROM purchase_items
        WHERE purchase_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_purchase_items", e))?;

    let mut items = Vec::with_capacity(item_rows.len());
    for item in &item_rows {
        items.push(PurchaseItem {
            line_no: line_no(item)?,
            product_id: ProductId::from(get::<Uuid>(item, "product_id")?),
            quantity: get(item, "quantity")?,
            purchase_price: money(item, "purchase_price_cents")?,
            total: money(item, "total_cents")?,
        });
    }

    let payment_mode: Option<String> = get(&row, "payment_mode")?;
    Ok(Some(PurchaseSnapshot {
        id: PurchaseId::from(get::<Uuid>(&row, "id")?),
        purchase_number: parse_column(&row, "purchase_number", |s| s.parse().ok())?,
        vendor_id: VendorId::from(get::<Uuid>(&row, "vendor_id")?),
        vendor_invoice_number: get(&row, "vendor_invoice_number")?,
        purchase_date: get::<NaiveDate>(&row, "purchase_date")?,
        payment_due_date: get(&row, "payment_due_date")?,
        items,
        totals: totals_from_row(&row)?,
        payment: payment_state_from_row(&row)?,
        payment_mode: payment_mode
            .map(|m| {
                m.parse::<PaymentMode>()
                    .map_err(|e| StoreError::Corrupt(format!("column payment_mode: {e}")))
            })
            .transpose()?,
        order_status: parse_column(&row, "order_status", OrderStatus::parse)?,
        notes: get(&row, "notes")?,
        created_by: UserId::from(get::<Uuid>(&row, "created_by")?),
        created_at: get::<DateTime<Utc>>(&row, "created_at")?,
        version: version(&row)?,
    }))
}

async fn fetch_invoice(
    conn: &mut PgConnection,
    id: InvoiceId,
    lock: bool,
) -> Result<Option<InvoiceSnapshot>, StoreError> {
    let sql = format!(
        r#"
        SELECT id, invoice_number, customer_id, invoice_date, due_date, {TOTALS_COLUMNS},
               amount_paid_cents, payment_status, payment_mode, notes, created_by,
               created_at, version
        FROM invoices
        WHERE id = $1{}
        "#,
        lock_clause(lock)
    );
    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_invoice", e))?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query(
        r#"
        SELECT line_no, product_id, quantity, unit_price_cents, discount_cents, total_cents
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_invoice_items", e))?;

    let mut items = Vec::with_capacity(item_rows.len());
    for item in &item_rows {
        items.push(InvoiceItem {
            line_no: line_no(item)?,
            product_id: ProductId::from(get::<Uuid>(item, "product_id")?),
            quantity: get(item, "quantity")?,
            unit_price: money(item, "unit_price_cents")?,
            discount: money(item, "discount_cents")?,
            total: money(item, "total_cents")?,
        });
    }

    Ok(Some(InvoiceSnapshot {
        id: InvoiceId::from(get::<Uuid>(&row, "id")?),
        invoice_number: parse_column(&row, "invoice_number", |s| s.parse::<DocumentNumber>().ok())?,
        customer_id: get::<Option<Uuid>>(&row, "customer_id")?.map(CustomerId::from),
        invoice_date: get(&row, "invoice_date")?,
        due_date: get(&row, "due_date")?,
        items,
        totals: totals_from_row(&row)?,
        payment: payment_state_from_row(&row)?,
        payment_mode: parse_column(&row, "payment_mode", |s| s.parse::<PaymentMode>().ok())?,
        notes: get(&row, "notes")?,
        created_by: UserId::from(get::<Uuid>(&row, "created_by")?),
        created_at: get(&row, "created_at")?,
        version: version(&row)?,
    }))
}

async fn fetch_payments(
    conn: &mut PgConnection,
    kind: DocumentKind,
    order_id: AggregateId,
) -> Result<Vec<Payment>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, order_kind, order_id, payment_date, amount_cents, mode, reference_no,
               notes, created_by, created_at
        FROM payments
        WHERE order_kind = $1 AND order_id = $2
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(kind.as_str())
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_payments", e))?;
    rows.iter().map(payment_from_row).collect()
}

fn line_no(row: &PgRow) -> Result<u32, StoreError> {
    let n: i32 = get(row, "line_no")?;
    u32::try_from(n).map_err(|_| StoreError::Corrupt(format!("negative line_no {n}")))
}

/// Map SQLx errors to [`StoreError`].
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") | Some("23505") => {
                    StoreError::Conflict(msg)
                }
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
