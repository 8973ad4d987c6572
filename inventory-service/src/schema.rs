diesel::table! {
    location_levels (location_id, item_id) {
        location_id -> Int8,
        item_id -> Int8,
        quantity -> Int8,
        checkpoint_transaction_id -> Int8,
    }
}

diesel::table! {
    stock_locations (location_id) {
        location_id -> Int8,
        name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    stock_transactions (id) {
        id -> Int8,
        item_id -> Int8,
        location_id -> Int8,
        zone -> Varchar,
        quantity_delta -> Int8,
        unit_cost -> Numeric,
        occurred_at -> Timestamptz,
        transaction_type_id -> Int4,
        related_transaction_id -> Nullable<Int8>,
        related_order_id -> Nullable<Uuid>,
        related_user_id -> Nullable<Uuid>,
        metadata -> Nullable<Jsonb>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    location_levels,
    stock_locations,
    stock_transactions,
);
