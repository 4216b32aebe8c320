pub mod storage;
pub mod trade_record;

pub use storage::{TradeHistory, TradeStorage};
pub use trade_record::TradeRecord;
