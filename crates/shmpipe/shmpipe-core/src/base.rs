use crate::error::TransportError;
use crate::naming;
use crate::ring::RingGeometry;
use shmpipe_codec::{HeaderCodec, MessageHeader};
use shmpipe_config::ChannelConfig;
use shmpipe_mmap::SharedRegion;
use shmpipe_sem::NamedSemaphore;
use tracing::debug;

/// Everything both ends of a channel hold: the mapped region, the two flow
/// control semaphores and the geometry they were built from.
///
/// Dropping the owner's base (the sink side) removes the region file and
/// unlinks both semaphore names.
pub(crate) struct RingTransportBase<H, S> {
    name: String,
    geometry: RingGeometry,
    codec: HeaderCodec<H>,
    region: SharedRegion,
    /// Chunks the producer may write into.
    chunk_ready: S,
    /// Chunks written and waiting for the consumer.
    data_ready: S,
}

impl<H: MessageHeader, S: NamedSemaphore> RingTransportBase<H, S> {
    /// Owner side: create the region and both semaphores at zero.
    pub fn create(config: &ChannelConfig) -> Result<Self, TransportError> {
        let codec = HeaderCodec::<H>::new();
        let region_len = config.validate(codec.size())?;
        let path = naming::region_path(&config.shm_dir, &config.name);
        let capacity = config.number_of_chunks as usize;

        let region = SharedRegion::create(&path, region_len)
            .map_err(|e| TransportError::io(path.display().to_string(), e))?;

        let chunk_ready_name = naming::chunk_ready_semaphore_name(&config.name);
        let chunk_ready = S::create(&chunk_ready_name, capacity)
            .map_err(|e| TransportError::io(chunk_ready_name, e))?;

        let data_ready_name = naming::data_ready_semaphore_name(&config.name);
        let data_ready = S::create(&data_ready_name, capacity)
            .map_err(|e| TransportError::io(data_ready_name, e))?;

        debug!(channel = %config.name, region_len, "created ring transport");
        Ok(Self::assemble(config, codec, region, chunk_ready, data_ready))
    }

    /// Peer side: open what the owner created. No retry; a missing object is
    /// reported as `PeerNotReady`.
    pub fn open(config: &ChannelConfig) -> Result<Self, TransportError> {
        let codec = HeaderCodec::<H>::new();
        let region_len = config.validate(codec.size())?;
        let path = naming::region_path(&config.shm_dir, &config.name);
        let capacity = config.number_of_chunks as usize;

        let region = SharedRegion::open(&path, region_len)
            .map_err(|e| TransportError::open(path.display().to_string(), e))?;

        let chunk_ready_name = naming::chunk_ready_semaphore_name(&config.name);
        let chunk_ready = S::open(&chunk_ready_name, capacity)
            .map_err(|e| TransportError::open(chunk_ready_name, e))?;

        let data_ready_name = naming::data_ready_semaphore_name(&config.name);
        let data_ready = S::open(&data_ready_name, capacity)
            .map_err(|e| TransportError::open(data_ready_name, e))?;

        debug!(channel = %config.name, region_len, "opened ring transport");
        Ok(Self::assemble(config, codec, region, chunk_ready, data_ready))
    }

    fn assemble(
        config: &ChannelConfig,
        codec: HeaderCodec<H>,
        region: SharedRegion,
        chunk_ready: S,
        data_ready: S,
    ) -> Self {
        let geometry = RingGeometry::new(
            config.chunk_size as usize,
            config.number_of_chunks as usize,
            codec.size(),
        );
        Self {
            name: config.name.clone(),
            geometry,
            codec,
            region,
            chunk_ready,
            data_ready,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &RingGeometry {
        &self.geometry
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn chunk_ready(&self) -> &S {
        &self.chunk_ready
    }

    pub fn data_ready(&self) -> &S {
        &self.data_ready
    }

    /// Number of chunks a message with this payload occupies.
    pub fn chunks_needed_for(&self, payload_size: i32) -> Result<usize, TransportError> {
        self.geometry
            .chunks_needed_for(payload_size)
            .ok_or(TransportError::NegativePayload(payload_size))
    }

    pub fn write_header(&self, offset: usize, header: &H) -> Result<(), TransportError> {
        self.region
            .write_at(offset, self.codec.encoded(header))
            .map_err(|e| TransportError::corruption(&self.name, e.to_string()))
    }

    /// Bounds violations here mean the channel is corrupted.
    pub fn read_header(&self, offset: usize) -> Result<H, TransportError> {
        self.codec
            .decode_with(|dst| self.region.read_at(offset, dst))
            .map_err(|e| TransportError::corruption(&self.name, e.to_string()))
    }

    /// Hand `count` chunk-ready permits back, e.g. after an aborted send.
    pub fn return_chunks(&self, count: usize) -> Result<(), TransportError> {
        if count == 0 {
            return Ok(());
        }
        self.chunk_ready
            .release(count)
            .map_err(|e| TransportError::io(self.chunk_ready.name(), e))
    }
}
