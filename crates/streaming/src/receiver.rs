//! Byte-stream halves of file transfer.
//!
//! File content follows an `Ok` frame unframed on the same connection. The
//! sending side writes the bytes and half-closes; the receiving side reads to
//! EOF. When the sender announced a length, EOF anywhere else is a failed
//! transfer. Received bytes land in a hidden sibling file that is renamed
//! into place only once the stream is complete, so a reader never sees a
//! partial file under its final name.

use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy the file at `source` into `writer`. Returns the byte count.
pub async fn send_file<W>(writer: &mut W, source: &Path) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut file = File::open(source).await?;
    let copied = io::copy(&mut file, writer).await?;
    writer.flush().await?;
    Ok(copied)
}

/// Read `reader` to EOF into `destination`. Returns the byte count.
///
/// With `expected`, a stream of any other length is rejected. On error the
/// partial file is removed and `destination` is untouched.
pub async fn receive_file<R>(
    reader: &mut R,
    destination: &Path,
    expected: Option<u64>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let partial = partial_path(destination);
    let result = async {
        let mut file = File::create(&partial).await?;
        let copied = io::copy(reader, &mut file).await?;
        if let Some(expected) = expected {
            if copied != expected {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("received {copied} of {expected} bytes"),
                ));
            }
        }
        file.sync_all().await?;
        Ok::<_, io::Error>(copied)
    }
    .await;

    match result {
        Ok(copied) => {
            fs::rename(&partial, destination).await?;
            Ok(copied)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

/// Hidden sibling used while a transfer is in flight.
pub fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.partial"))
}

/// True for names produced by `partial_path`.
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".partial")
}
