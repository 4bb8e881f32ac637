use lazy_static::lazy_static;
use prometheus::{exponential_buckets, Histogram, HistogramOpts, Registry};

lazy_static! {
    pub static ref PAGE_DECODE_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("page_decode_time", "Time to decode novelty pages",)
            .namespace("onair")
            .buckets(exponential_buckets(0.000001, 2.0, 17).unwrap()),
    )
    .unwrap();
    pub static ref BLOCK_PUT_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("block_put_time", "Complete time spent in block put",)
            .namespace("onair")
            .buckets(exponential_buckets(0.00001, 2.0, 17).unwrap()),
    )
    .unwrap();
    pub static ref BLOCK_GET_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("block_get_time", "Complete time spent in block get",)
            .namespace("onair")
            .buckets(exponential_buckets(0.00001, 2.0, 17).unwrap()),
    )
    .unwrap();
    pub static ref BLOCK_PUT_SIZE_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("block_put_size", "Size of blocks being written",)
            .namespace("onair")
            .buckets(exponential_buckets(64.0, 2.0, 16).unwrap()),
    )
    .unwrap();
    pub static ref BLOCK_GET_SIZE_HIST: Histogram = Histogram::with_opts(
        HistogramOpts::new("block_get_size", "Size of blocks being read",)
            .namespace("onair")
            .buckets(exponential_buckets(64.0, 2.0, 16).unwrap()),
    )
    .unwrap();
}

pub(crate) fn register(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(PAGE_DECODE_HIST.clone()))?;
    registry.register(Box::new(BLOCK_PUT_HIST.clone()))?;
    registry.register(Box::new(BLOCK_GET_HIST.clone()))?;
    registry.register(Box::new(BLOCK_PUT_SIZE_HIST.clone()))?;
    registry.register(Box::new(BLOCK_GET_SIZE_HIST.clone()))?;
    Ok(())
}
