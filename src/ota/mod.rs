//! The OTA pipeline: stream a firmware image over WiFi + HTTP onto the next
//! OTA partition, crash-safe.
//!
//! The writer defers the first 16 bytes of the image (the part the bootloader
//! validates) to a single final write, gated by the MD5 check and a magic-byte
//! read-back. A reboot at any earlier point leaves the partition without a
//! valid image header, so the bootloader falls back to the previous image.

mod flash;

pub use self::flash::FlashWriter;

use std::future::Future;
use std::time::Duration;

use log::{error, info};
use md5::{Digest, Md5};

use crate::core::{
    OtaError, ENCRYPTED_BLOCK_SIZE, FIRMWARE_IMAGE_MAGIC, FLASH_SECTOR_SIZE, MD5_HEX_LEN,
    OTA_HTTP_TIMEOUT,
};
use crate::node::FirmwareUpdater;

/// WiFi client contract used for the download.
pub trait WifiStation {
    /// Associate with the access point and obtain an address. `retries`
    /// reconnect attempts are allowed within the overall `timeout`.
    fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
        retries: u16,
    ) -> impl Future<Output = Result<(), OtaError>> + Send;
}

/// Streaming HTTP client contract.
pub trait HttpClient {
    /// The streamed response type.
    type Response: HttpResponse + Send;

    /// Open a GET request and fetch the response headers.
    fn get(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Response, OtaError>> + Send;
}

/// One streamed HTTP response.
pub trait HttpResponse {
    /// The HTTP status code.
    fn status_code(&self) -> u16;

    /// The announced body length, if the server sent one.
    fn content_length(&self) -> Option<u64>;

    /// Read some body bytes into `buf`; returns 0 at end of body.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, OtaError>> + Send;
}

/// The target flash partition.
///
/// Offsets are partition-relative; `address` is the partition's absolute
/// flash address, needed for erase-block alignment.
pub trait OtaPartition {
    /// Partition size in bytes.
    fn size(&self) -> u64;

    /// Absolute flash address of the partition start.
    fn address(&self) -> u64;

    /// Whether the partition is transparently encrypted. Empty-block write
    /// skipping is only safe on unencrypted partitions.
    fn encrypted(&self) -> bool;

    /// Erase `len` bytes starting at `offset`.
    fn erase_range(&mut self, offset: u64, len: u64) -> Result<(), OtaError>;

    /// Write `data` at `offset`. The range must have been erased.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), OtaError>;

    /// Read into `buf` from `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), OtaError>;

    /// Mark this partition as the next boot target.
    fn set_boot(&mut self) -> Result<(), OtaError>;
}

/// Reboot hook. Does not return on real hardware.
pub trait SystemReset {
    /// Reboot the device.
    fn restart(&mut self);
}

/// The provided [`FirmwareUpdater`] implementation, assembled from the four
/// platform seams.
pub struct OtaUpdater<W, C, P, R> {
    wifi: W,
    http: C,
    partition: P,
    reset: R,
}

impl<W, C, P, R> OtaUpdater<W, C, P, R>
where
    W: WifiStation + Send,
    C: HttpClient + Send,
    P: OtaPartition + Send,
    R: SystemReset + Send,
{
    /// Assemble an updater around the platform pieces. `partition` is the
    /// next OTA partition as picked by the platform's partition table.
    pub fn new(wifi: W, http: C, partition: P, reset: R) -> Self {
        Self {
            wifi,
            http,
            partition,
            reset,
        }
    }

    async fn download_and_write(&mut self, url: &str, md5: Option<&str>) -> Result<(), OtaError> {
        if let Some(md5) = md5 {
            if md5.len() != MD5_HEX_LEN {
                // Leave empty for no checksum verification.
                return Err(OtaError::InvalidMd5Length {
                    expected: MD5_HEX_LEN,
                    actual: md5.len(),
                });
            }
        }

        info!("using url {url}");
        let mut response = self.http.get(url, OTA_HTTP_TIMEOUT).await?;
        let status = response.status_code();
        let content_length = response.content_length();
        info!("http status {status} with content length {content_length:?}");

        if status != 200 {
            return Err(OtaError::HttpStatus(status));
        }
        let length = match content_length {
            Some(length)
                if length >= ENCRYPTED_BLOCK_SIZE as u64 && length <= self.partition.size() =>
            {
                length
            }
            other => {
                return Err(OtaError::BadContentLength {
                    length: other,
                    partition: self.partition.size(),
                })
            }
        };

        write_stream(&mut self.partition, &mut response, length, md5).await
    }
}

impl<W, C, P, R> FirmwareUpdater for OtaUpdater<W, C, P, R>
where
    W: WifiStation + Send,
    C: HttpClient + Send,
    P: OtaPartition + Send,
    R: SystemReset + Send,
{
    async fn connect_wifi(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
        retries: u16,
    ) -> Result<(), OtaError> {
        self.wifi.connect(ssid, password, timeout, retries).await
    }

    async fn update_from(&mut self, url: &str, md5: Option<&str>) -> Result<(), OtaError> {
        self.download_and_write(url, md5).await
    }

    fn restart(&mut self) {
        self.reset.restart();
    }
}

/// Stream `content_length` body bytes onto the partition in sector-sized
/// blocks, then commit the deferred head.
pub(crate) async fn write_stream<P, B>(
    partition: &mut P,
    body: &mut B,
    content_length: u64,
    md5: Option<&str>,
) -> Result<(), OtaError>
where
    P: OtaPartition,
    B: HttpResponse,
{
    let mut buffer = vec![0u8; FLASH_SECTOR_SIZE];
    let mut head = [0u8; ENCRYPTED_BLOCK_SIZE];
    let mut digest = Md5::new();
    let mut writer = FlashWriter::new();

    let mut bytes_read: u64 = 0;
    while bytes_read < content_length {
        let want = FLASH_SECTOR_SIZE.min((content_length - bytes_read) as usize);
        fill_buffer(body, &mut buffer[..want]).await?;

        let mut skip = 0;
        if bytes_read == 0 {
            if buffer[0] != FIRMWARE_IMAGE_MAGIC {
                error!("start of firmware does not contain magic byte");
                return Err(OtaError::MagicMismatch(buffer[0]));
            }
            // Stash the head and hold it back so a partially written image
            // is not bootable.
            head.copy_from_slice(&buffer[..ENCRYPTED_BLOCK_SIZE]);
            skip = ENCRYPTED_BLOCK_SIZE;
        }

        writer.write_chunk(partition, bytes_read, &buffer[..want], skip)?;
        digest.update(&buffer[..want]);
        bytes_read += want as u64;
    }

    if let Some(expected) = md5 {
        let computed = hex::encode(digest.finalize());
        if !computed.eq_ignore_ascii_case(expected) {
            error!("md5 checksum verification failed");
            return Err(OtaError::Md5Mismatch);
        }
        info!("md5 checksum correct");
    }

    // Commit: the head goes in last, making the image bootable.
    partition.write(0, &head)?;

    let mut check = [0u8; ENCRYPTED_BLOCK_SIZE];
    partition.read(0, &mut check)?;
    if check[0] != FIRMWARE_IMAGE_MAGIC {
        return Err(OtaError::NotBootable);
    }
    partition.set_boot()?;
    Ok(())
}

/// Read from the body until `buf` is full. A short body is an error; the
/// caller sizes `buf` from the announced content length.
async fn fill_buffer<B: HttpResponse>(body: &mut B, buf: &mut [u8]) -> Result<(), OtaError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = body.read(&mut buf[filled..]).await?;
        if read == 0 {
            error!("failed to fill buffer, body ended early");
            return Err(OtaError::ShortRead);
        }
        filled += read;
    }
    Ok(())
}
