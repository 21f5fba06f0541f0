pub mod total_order;

pub use total_order::TotalOrder;
