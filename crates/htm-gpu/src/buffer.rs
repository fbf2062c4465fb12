//! Device memory: allocation, release and host transfers.

use htm_tensor::{Result, TensorError};
use log::trace;

use crate::context::DeviceContext;
use crate::driver::Driver;

/// A device allocation of fixed size.
///
/// Buffers are not freed on drop; ownership goes back to the context through
/// [`DeviceContext::release`]. Tensor handles do this when their last owner
/// goes away.
#[derive(Debug)]
pub struct Buffer<D: Driver> {
    raw: D::Buffer,
    bytes: usize,
}

impl<D: Driver> Buffer<D> {
    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Driver handle, for binding as a kernel argument.
    pub fn raw(&self) -> &D::Buffer {
        &self.raw
    }
}

impl<D: Driver> DeviceContext<D> {
    pub fn allocate(&self, bytes: usize) -> Result<Buffer<D>> {
        let raw = self
            .driver()
            .alloc(bytes)
            .map_err(|e| TensorError::Allocation {
                bytes,
                reason: e.to_string(),
            })?;
        trace!("allocated {} bytes", bytes);
        Ok(Buffer { raw, bytes })
    }

    /// Give a buffer back to the device.
    pub fn release(&self, buffer: Buffer<D>) {
        trace!("released {} bytes", buffer.bytes);
        self.driver().free(buffer.raw);
    }

    /// Blocking write of `data`, which must fill the buffer exactly.
    pub fn write(&self, buffer: &Buffer<D>, data: &[u8]) -> Result<()> {
        if data.len() != buffer.bytes {
            return Err(TensorError::Transfer(format!(
                "write of {} bytes into a {} byte buffer",
                data.len(),
                buffer.bytes
            )));
        }
        self.driver()
            .write(&buffer.raw, data)
            .map_err(|e| TensorError::Transfer(format!("{}, write size {}", e, buffer.bytes)))
    }

    /// Blocking read of the whole buffer into `dest`.
    pub fn read(&self, buffer: &Buffer<D>, dest: &mut [u8]) -> Result<()> {
        if dest.len() != buffer.bytes {
            return Err(TensorError::Transfer(format!(
                "read of a {} byte buffer into {} bytes of host memory",
                buffer.bytes,
                dest.len()
            )));
        }
        self.driver()
            .read(&buffer.raw, dest)
            .map_err(|e| TensorError::Transfer(format!("{}, read size {}", e, buffer.bytes)))
    }

    /// New buffer with a device-side copy of `src` enqueued into it.
    pub fn duplicate(&self, src: &Buffer<D>) -> Result<Buffer<D>> {
        let dst = self.allocate(src.bytes)?;
        if let Err(e) = self.driver().copy(&src.raw, &dst.raw, src.bytes) {
            self.release(dst);
            return Err(TensorError::Dispatch {
                operation: "copy",
                code: e.code,
            });
        }
        Ok(dst)
    }

    /// Wait for all submitted work.
    pub fn sync(&self) -> Result<()> {
        self.driver().finish().map_err(|e| TensorError::Dispatch {
            operation: "sync",
            code: e.code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostDriver;

    fn context() -> DeviceContext<HostDriver> {
        DeviceContext::new(HostDriver::new().with_max_alloc(4096)).unwrap()
    }

    #[test]
    fn test_allocate_and_release() {
        let ctx = context();
        let buf = ctx.allocate(128).unwrap();
        assert_eq!(buf.len(), 128);
        assert_eq!(ctx.driver().live_buffers(), 1);
        ctx.release(buf);
        assert_eq!(ctx.driver().live_buffers(), 0);
    }

    #[test]
    fn test_allocation_rejected() {
        let ctx = context();
        match ctx.allocate(4097) {
            Err(TensorError::Allocation { bytes, .. }) => assert_eq!(bytes, 4097),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(ctx.driver().live_buffers(), 0);
    }

    #[test]
    fn test_transfers_must_match_size() {
        let ctx = context();
        let buf = ctx.allocate(4).unwrap();
        assert!(matches!(
            ctx.write(&buf, &[1, 2, 3]),
            Err(TensorError::Transfer(_))
        ));
        ctx.write(&buf, &[1, 2, 3, 4]).unwrap();

        let mut short = [0u8; 2];
        assert!(ctx.read(&buf, &mut short).is_err());
        let mut out = [0u8; 4];
        ctx.read(&buf, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        ctx.release(buf);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let ctx = context();
        let a = ctx.allocate(4).unwrap();
        ctx.write(&a, &[9, 8, 7, 6]).unwrap();
        let b = ctx.duplicate(&a).unwrap();
        ctx.write(&a, &[0, 0, 0, 0]).unwrap();
        ctx.sync().unwrap();

        let mut out = [0u8; 4];
        ctx.read(&b, &mut out).unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
        ctx.release(a);
        ctx.release(b);
        assert_eq!(ctx.driver().live_buffers(), 0);
    }
}
