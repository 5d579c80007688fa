use std::io;

use crate::{OpenMode, XFile, XFileBackend};

/// Transport side of an RPC call carrying a dump
///
/// `recv` blocks until some data is available and returns 0 at the end
/// of the call, `send` may accept less than the whole buffer.
pub trait RpcCall {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Terminate the call.
    fn end(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stream over an RPC call. Never seekable.
pub struct RpcBackend<C> {
    call: C,
    ended: bool,
}

impl<C: RpcCall> XFileBackend for RpcBackend<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.call.recv(&mut buf[done..])? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("rpc call ended after {} of {} bytes", done, buf.len()),
                    ))
                }
                n => done += n,
            }
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.call.send(&buf[done..])? {
                0 => proxmox_lang::io_bail!(
                    "rpc call refused data after {} of {} bytes",
                    done,
                    buf.len()
                ),
                n => done += n,
            }
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.call.end()
    }
}

/// Open a stream on an RPC call.
pub fn open_rpc<C: RpcCall + 'static>(call: C, mode: OpenMode) -> XFile {
    XFile::new(Box::new(RpcBackend { call, ended: false }), mode, false)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::Error;

    use super::*;

    /// Delivers data in small pieces, like a network transport would.
    struct PiecewiseCall {
        data: Vec<u8>,
        pos: usize,
        sent: Rc<RefCell<Vec<u8>>>,
    }

    impl RpcCall for PiecewiseCall {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.sent.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_rpc_piecewise_transfer() -> Result<(), Error> {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let call = PiecewiseCall {
            data: b"0123456789".to_vec(),
            pos: 0,
            sent: sent.clone(),
        };
        let mut xf = open_rpc(call, OpenMode::ReadWrite);
        assert!(!xf.is_seekable());

        let mut buf = [0u8; 8];
        xf.read(&mut buf)?;
        assert_eq!(&buf, b"01234567");

        xf.write(b"hello")?;
        assert_eq!(&sent.borrow()[..], b"hello");

        // only two bytes left
        assert!(xf.read(&mut buf[..4]).unwrap_err().is_eof());
        Ok(())
    }
}
