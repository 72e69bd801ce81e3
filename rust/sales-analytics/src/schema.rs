//! Diesel schema for the `sales` fact table.

diesel::table! {
    use diesel::sql_types::*;

    sales (id) {
        id -> Int8,
        transaction_date -> Date,
        customer_id -> Nullable<Text>,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        customer_age -> Nullable<Int4>,
        customer_gender -> Nullable<Text>,
        country -> Nullable<Text>,
        region -> Nullable<Text>,
        product_category -> Nullable<Text>,
        product_sku -> Nullable<Text>,
        marketing_channel -> Nullable<Text>,
        customer_segment -> Nullable<Text>,
        payment_method -> Nullable<Text>,
        cart_abandonment -> Nullable<Text>,
        quantity -> Nullable<Int4>,
        total_amount -> Nullable<Numeric>,
        total_profit -> Nullable<Numeric>,
        discount_applied -> Nullable<Numeric>,
        customer_lifetime_value -> Nullable<Numeric>,
        net_promoter_score -> Nullable<Int4>,
        customer_satisfaction_score -> Nullable<Int4>,
    }
}
