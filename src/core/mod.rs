pub mod item;
pub mod pool;
pub mod preference;
pub mod store;
pub mod trade_loop;
pub mod wallet;
