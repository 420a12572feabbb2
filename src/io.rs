/*
 * Copyright (C) 2025 the transom authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

// Poll-based I/O traits for any duplex byte stream the host hands us
// (plain TCP, a TLS session, an in-memory pipe). The host's reactor
// arranges wakeups.

/// Withdraws whatever interest a pending operation registered with the
/// stream. Shared by both directions; every operation future calls it
/// on drop.
pub trait Cancel {
    fn cancel(&mut self);
}

pub trait AsyncRead: Cancel + Unpin {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<Result<usize, io::Error>>;
}

pub trait AsyncWrite: Cancel + Unpin {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>>;

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        for b in bufs {
            if !b.is_empty() {
                return self.poll_write(cx, b);
            }
        }

        self.poll_write(cx, &[])
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>>;
}

/// A pollable I/O step with cancel-on-drop.
///
/// Every extension-trait operation below is an instance of this one
/// future: the stored closure advances the operation each poll, and
/// dropping the future tells the stream to withdraw any interest the
/// operation still has pending.
pub struct Operation<'a, T: ?Sized + Cancel, F> {
    io: &'a mut T,
    op: F,
}

impl<'a, T: ?Sized + Cancel, F> Operation<'a, T, F> {
    fn new(io: &'a mut T, op: F) -> Self {
        Self { io, op }
    }
}

impl<T, F, R> Future for Operation<'_, T, F>
where
    T: ?Sized + Cancel + Unpin,
    F: FnMut(&mut T, &mut Context<'_>) -> Poll<R> + Unpin,
{
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let op = &mut *self;

        (op.op)(op.io, cx)
    }
}

impl<T: ?Sized + Cancel, F> Drop for Operation<'_, T, F> {
    fn drop(&mut self) {
        self.io.cancel();
    }
}

pub trait AsyncReadExt: AsyncRead {
    /// Reads some bytes into buf.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Operation<'a, Self, impl FnMut(&mut Self, &mut Context<'_>) -> Poll<Result<usize, io::Error>> + 'a>
    where
        Self: Sized,
    {
        Operation::new(self, move |r: &mut Self, cx: &mut Context<'_>| {
            Pin::new(r).poll_read(cx, buf)
        })
    }

    /// Fills buf completely, failing with UnexpectedEof if the stream
    /// ends first.
    fn read_exact<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Operation<'a, Self, impl FnMut(&mut Self, &mut Context<'_>) -> Poll<Result<(), io::Error>> + 'a>
    where
        Self: Sized,
    {
        let mut pos = 0;

        Operation::new(self, move |r: &mut Self, cx: &mut Context<'_>| {
            let mut r = Pin::new(r);

            while pos < buf.len() {
                match r.as_mut().poll_read(cx, &mut buf[pos..]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof)))
                    }
                    Poll::Ready(Ok(size)) => pos += size,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            Poll::Ready(Ok(()))
        })
    }
}

pub trait AsyncWriteExt: AsyncWrite {
    /// Writes all of buf before completing.
    fn write<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> Operation<'a, Self, impl FnMut(&mut Self, &mut Context<'_>) -> Poll<Result<usize, io::Error>> + 'a>
    where
        Self: Sized,
    {
        let mut pos = 0;

        Operation::new(self, move |w: &mut Self, cx: &mut Context<'_>| {
            let mut w = Pin::new(w);

            while pos < buf.len() {
                match w.as_mut().poll_write(cx, &buf[pos..]) {
                    Poll::Ready(Ok(size)) => pos += size,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            Poll::Ready(Ok(buf.len()))
        })
    }

    fn close(
        &mut self,
    ) -> Operation<'_, Self, impl FnMut(&mut Self, &mut Context<'_>) -> Poll<Result<(), io::Error>> + '_>
    where
        Self: Sized,
    {
        Operation::new(self, |w: &mut Self, cx: &mut Context<'_>| Pin::new(w).poll_close(cx))
    }
}

impl<R: AsyncRead> AsyncReadExt for R {}
impl<W: AsyncWrite> AsyncWriteExt for W {}

/// `std::io::Write` view of an `AsyncWrite` for the duration of one
/// poll. Pending surfaces as WouldBlock, which sans-IO encoders treat
/// as "try again when writable".
pub struct PollWrite<'a, 'b, W> {
    inner: Pin<&'a mut W>,
    cx: &'a mut Context<'b>,
}

impl<'a, 'b, W: AsyncWrite> PollWrite<'a, 'b, W> {
    pub fn new(inner: Pin<&'a mut W>, cx: &'a mut Context<'b>) -> Self {
        Self { inner, cx }
    }
}

impl<W: AsyncWrite> Write for PollWrite<'_, '_, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        match self.inner.as_mut().poll_write(self.cx, buf) {
            Poll::Ready(ret) => ret,
            Poll::Pending => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice]) -> Result<usize, io::Error> {
        match self.inner.as_mut().poll_write_vectored(self.cx, bufs) {
            Poll::Ready(ret) => ret,
            Poll::Pending => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp;
    use std::pin::pin;
    use std::sync::Arc;
    use std::task::Wake;

    struct TestBuffer {
        data: Vec<u8>,
        cancels: usize,
    }

    impl TestBuffer {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                cancels: 0,
            }
        }
    }

    impl Cancel for TestBuffer {
        fn cancel(&mut self) {
            self.cancels += 1;
        }
    }

    impl AsyncRead for TestBuffer {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context,
            buf: &mut [u8],
        ) -> Poll<Result<usize, io::Error>> {
            let size = cmp::min(buf.len(), self.data.len());

            let left = self.data.split_off(size);

            buf[..size].copy_from_slice(&self.data);

            self.data = left;

            Poll::Ready(Ok(size))
        }
    }

    impl AsyncWrite for TestBuffer {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context,
            buf: &[u8],
        ) -> Poll<Result<usize, io::Error>> {
            let size = self.data.write(buf).unwrap();

            Poll::Ready(Ok(size))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    #[test]
    fn read_write() {
        let mut fut = pin!(async {
            let mut buf = TestBuffer::new();

            let mut data = [0; 16];

            assert_eq!(buf.read(&mut data).await.unwrap(), 0);
            assert_eq!(buf.write(b"hello").await.unwrap(), 5);
            assert_eq!(buf.read(&mut data).await.unwrap(), 5);
            assert_eq!(&data[..5], b"hello");
        });

        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn read_exact() {
        let mut fut = pin!(async {
            let mut buf = TestBuffer::new();

            buf.data.extend_from_slice(b"hello world");

            let mut data = [0; 5];
            buf.read_exact(&mut data).await.unwrap();
            assert_eq!(&data, b"hello");

            let mut data = [0; 16];
            let e = buf.read_exact(&mut data).await.unwrap_err();
            assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
        });

        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn cancel_on_drop() {
        let mut buf = TestBuffer::new();

        {
            let mut data = [0; 4];
            let _dropped_unpolled = buf.read(&mut data);
        }

        assert_eq!(buf.cancels, 1);
    }
}
