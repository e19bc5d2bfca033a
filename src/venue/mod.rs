pub mod binance_futures;

pub use binance_futures::{BinanceFuturesClient, InstrumentFilters, OrderAck, OrderType, VenueError, VenuePosition};
