//! Booking database queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::types::NewBooking;

/// Insert an accepted booking and return its id.
pub async fn insert_booking(pool: &PgPool, booking: &NewBooking) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    let b = &booking.booking;

    sqlx::query(
        r#"
        INSERT INTO bookings
            (id, booking_date, city, name, email, phone, client_address, bot_verified)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(&b.date)
    .bind(&b.city)
    .bind(&b.name)
    .bind(&b.email)
    .bind(&b.phone)
    .bind(&booking.client_address)
    .bind(booking.bot_verified)
    .execute(pool)
    .await?;

    Ok(id)
}
