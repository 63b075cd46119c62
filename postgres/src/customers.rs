//! Customer Identity Resolver over the `customers` table.

use async_trait::async_trait;
use boxoffice_core::{Customer, CustomerDirectory, CustomerId, CustomerProfile, StoreError};
use sqlx::{PgPool, Row};

use crate::error::store_error;

/// PostgreSQL customer directory.
///
/// The unique index on `email` makes [`resolve`](CustomerDirectory::resolve)
/// a single atomic upsert, so concurrent checkouts for a new address agree on
/// one row.
#[derive(Clone, Debug)]
pub struct PgCustomerDirectory {
    pool: PgPool,
}

impl PgCustomerDirectory {
    /// Create a directory over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_customer(row: &sqlx::postgres::PgRow) -> Customer {
        Customer {
            id: CustomerId::new(row.get("id")),
            email: row.get("email"),
            name: row.get("custname"),
            phone: row.get("phone"),
            address: row.get("custaddress"),
            newsletter_opt_in: row.get("newsletter"),
            volunteer_opt_in: row.get("volunteerlist"),
            vip: row.get("vip"),
            donor_badge: row.get("donorbadge"),
            seating_accommodation: row.get("seatingaccom"),
        }
    }
}

#[async_trait]
impl CustomerDirectory for PgCustomerDirectory {
    #[tracing::instrument(skip(self, profile))]
    async fn resolve(
        &self,
        email: &str,
        profile: &CustomerProfile,
    ) -> Result<CustomerId, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO customers (email, custname, phone, custaddress, newsletter, seatingaccom)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET custname = EXCLUDED.custname,
                phone = EXCLUDED.phone,
                custaddress = EXCLUDED.custaddress,
                newsletter = EXCLUDED.newsletter,
                seatingaccom = EXCLUDED.seatingaccom
            RETURNING id
            ",
        )
        .bind(email)
        .bind(&profile.name)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(profile.newsletter_opt_in)
        .bind(&profile.seating_accommodation)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        tracing::debug!(customer_id = id, "Customer resolved");
        Ok(CustomerId::new(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, email, custname, phone, custaddress, newsletter,
                   volunteerlist, vip, donorbadge, seatingaccom
            FROM customers
            WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.as_ref().map(Self::row_to_customer))
    }
}
