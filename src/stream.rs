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

use crate::buffer::{write_vectored_offset, LineBuffer, VECTORED_MAX};
use crate::io::{AsyncRead, AsyncWrite, Cancel, PollWrite};
use std::cell::{Cell, RefCell};
use std::cmp;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

// serializes submissions in ticket order. tickets are handed out when
// an operation is submitted; an operation runs only while its ticket is
// the one being served, and abandoned tickets are skipped so a dropped
// future can't stall the queue
struct Strand {
    next_ticket: Cell<u64>,
    serving: Cell<u64>,
    abandoned: RefCell<Vec<u64>>,
    waiters: RefCell<Vec<Waker>>,
}

impl Strand {
    fn new() -> Self {
        Self {
            next_ticket: Cell::new(0),
            serving: Cell::new(0),
            abandoned: RefCell::new(Vec::new()),
            waiters: RefCell::new(Vec::new()),
        }
    }

    fn submit(&self) -> u64 {
        let ticket = self.next_ticket.get();
        self.next_ticket.set(ticket + 1);

        ticket
    }

    fn is_turn(&self, ticket: u64) -> bool {
        self.serving.get() == ticket
    }

    fn park(&self, waker: &Waker) {
        self.waiters.borrow_mut().push(waker.clone());
    }

    fn release(&self, ticket: u64) {
        if self.serving.get() != ticket {
            self.abandoned.borrow_mut().push(ticket);
            return;
        }

        let mut serving = ticket + 1;

        let abandoned = &mut *self.abandoned.borrow_mut();
        while let Some(pos) = abandoned.iter().position(|&t| t == serving) {
            abandoned.swap_remove(pos);
            serving += 1;
        }

        self.serving.set(serving);

        for waker in self.waiters.borrow_mut().drain(..) {
            waker.wake();
        }
    }
}

/// Adaptor over any duplex byte stream (a TCP socket, a TLS session)
/// shared by the exchanges sequenced over one connection.
///
/// Adds two things the HTTP layer needs: a FIFO put-back buffer for
/// bytes over-read during header parsing, and serialization of
/// concurrent operations so a logical write (prologue + chunk header +
/// body + chunk footer) can never interleave with another writer.
pub struct Stream<S> {
    inner: RefCell<S>,
    put_back: RefCell<VecDeque<u8>>,
    read_strand: Strand,
    write_strand: Strand,
}

impl<S> Stream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: RefCell::new(inner),
            put_back: RefCell::new(VecDeque::new()),
            read_strand: Strand::new(),
            write_strand: Strand::new(),
        }
    }

    /// Prepends bytes to the next read. Bytes are delivered in FIFO
    /// order across calls.
    pub fn put_back(&self, bytes: &[u8]) {
        log::trace!("put back {} bytes", bytes.len());

        self.put_back.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S: AsyncRead> Stream<S> {
    /// Reads some bytes. The put-back buffer is emptied before the
    /// underlying stream is touched; while it is non-empty this never
    /// suspends. A zero-length request completes immediately with 0.
    pub fn read_some<'a>(&'a self, buf: &'a mut [u8]) -> ReadSome<'a, S> {
        ReadSome {
            stream: self,
            buf,
            ticket: None,
            done: false,
        }
    }

    /// Reads exactly buf.len() bytes, failing with UnexpectedEof if the
    /// stream ends first.
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<(), io::Error> {
        let mut pos = 0;

        while pos < buf.len() {
            let size = self.read_some(&mut buf[pos..]).await?;

            if size == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }

            pos += size;
        }

        Ok(())
    }

    /// Reads into the accumulator until it contains the delimiter.
    /// Bytes past the delimiter stay in the accumulator.
    pub async fn read_until(
        &self,
        buf: &mut LineBuffer,
        delimiter: &[u8],
    ) -> Result<(), io::Error> {
        while !buf.contains(delimiter) {
            self.read_more(buf).await?;
        }

        Ok(())
    }

    /// Reads at least one more byte into the accumulator.
    pub async fn read_more(&self, buf: &mut LineBuffer) -> Result<usize, io::Error> {
        let mut scratch = [0; 4096];

        let size = self.read_some(&mut scratch).await?;

        if size == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }

        buf.fill(&scratch[..size]);

        Ok(size)
    }
}

impl<S: AsyncWrite> Stream<S> {
    /// Writes the full logical concatenation of bufs as one serialized
    /// submission. Submissions are applied to the wire in submission
    /// order, never interleaved.
    pub fn write_all<'a>(&'a self, bufs: &'a [&'a [u8]]) -> WriteAll<'a, S> {
        assert!(bufs.len() <= VECTORED_MAX);

        let mut total = 0;
        for buf in bufs {
            total += buf.len();
        }

        WriteAll {
            stream: self,
            bufs,
            ticket: self.write_strand.submit(),
            pos: 0,
            total,
            done: false,
        }
    }
}

pub struct ReadSome<'a, S: AsyncRead> {
    stream: &'a Stream<S>,
    buf: &'a mut [u8],
    ticket: Option<u64>,
    done: bool,
}

impl<S: AsyncRead> Future for ReadSome<'_, S> {
    type Output = Result<usize, io::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let f = &mut *self;

        if f.buf.is_empty() {
            f.finish();
            return Poll::Ready(Ok(0));
        }

        {
            let put_back = &mut *f.stream.put_back.borrow_mut();

            if !put_back.is_empty() {
                let size = cmp::min(f.buf.len(), put_back.len());

                for (i, b) in put_back.drain(..size).enumerate() {
                    f.buf[i] = b;
                }

                f.finish();
                return Poll::Ready(Ok(size));
            }
        }

        let ticket = match f.ticket {
            Some(ticket) => ticket,
            None => {
                let ticket = f.stream.read_strand.submit();
                f.ticket = Some(ticket);
                ticket
            }
        };

        if !f.stream.read_strand.is_turn(ticket) {
            f.stream.read_strand.park(cx.waker());
            return Poll::Pending;
        }

        let mut inner = f.stream.inner.borrow_mut();

        match Pin::new(&mut *inner).poll_read(cx, f.buf) {
            Poll::Ready(ret) => {
                drop(inner);
                f.finish();
                Poll::Ready(ret)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead> ReadSome<'_, S> {
    fn finish(&mut self) {
        self.done = true;

        if let Some(ticket) = self.ticket {
            self.stream.read_strand.release(ticket);
        }
    }
}

impl<S: AsyncRead> Drop for ReadSome<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(ticket) = self.ticket {
                self.stream.inner.borrow_mut().cancel();
                self.stream.read_strand.release(ticket);
            }
        }
    }
}

pub struct WriteAll<'a, S: AsyncWrite> {
    stream: &'a Stream<S>,
    bufs: &'a [&'a [u8]],
    ticket: u64,
    pos: usize,
    total: usize,
    done: bool,
}

impl<S: AsyncWrite> Future for WriteAll<'_, S> {
    type Output = Result<usize, io::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let f = &mut *self;

        if !f.stream.write_strand.is_turn(f.ticket) {
            f.stream.write_strand.park(cx.waker());
            return Poll::Pending;
        }

        while f.pos < f.total {
            let mut inner = f.stream.inner.borrow_mut();
            let mut w = PollWrite::new(Pin::new(&mut *inner), cx);

            match write_vectored_offset(&mut w, f.bufs, f.pos) {
                Ok(size) => f.pos += size,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Poll::Pending,
                Err(e) => {
                    drop(inner);
                    f.done = true;
                    f.stream.write_strand.release(f.ticket);
                    return Poll::Ready(Err(e));
                }
            }
        }

        f.done = true;
        f.stream.write_strand.release(f.ticket);

        Poll::Ready(Ok(f.total))
    }
}

impl<S: AsyncWrite> Drop for WriteAll<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            self.stream.inner.borrow_mut().cancel();
            self.stream.write_strand.release(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::sync::Arc;
    use std::task::Wake;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    struct FakeStream {
        in_data: Vec<u8>,
        out_data: Vec<u8>,
        reads: usize,
        // bytes accepted per poll_write before reporting Pending
        write_budget: Cell<usize>,
    }

    impl FakeStream {
        fn new() -> Self {
            Self {
                in_data: Vec::new(),
                out_data: Vec::new(),
                reads: 0,
                write_budget: Cell::new(usize::MAX),
            }
        }
    }

    impl Cancel for FakeStream {
        fn cancel(&mut self) {}
    }

    impl AsyncRead for FakeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context,
            buf: &mut [u8],
        ) -> Poll<Result<usize, io::Error>> {
            self.reads += 1;

            let size = cmp::min(buf.len(), self.in_data.len());

            let left = self.in_data.split_off(size);

            buf[..size].copy_from_slice(&self.in_data);

            self.in_data = left;

            Poll::Ready(Ok(size))
        }
    }

    impl AsyncWrite for FakeStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context,
            buf: &[u8],
        ) -> Poll<Result<usize, io::Error>> {
            let budget = self.write_budget.get();

            if budget == 0 {
                return Poll::Pending;
            }

            let size = cmp::min(budget, buf.len());
            self.write_budget.set(budget - size);

            self.out_data.extend_from_slice(&buf[..size]);

            Poll::Ready(Ok(size))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn put_back_before_stream() {
        let mut fut = pin!(async {
            let mut inner = FakeStream::new();
            inner.in_data.extend_from_slice(b"stream");

            let stream = Stream::new(inner);
            stream.put_back(b"put");
            stream.put_back(b"back");

            let mut buf = [0; 16];

            // put-back bytes come out first, FIFO, without touching the
            // underlying stream
            let size = stream.read_some(&mut buf).await.unwrap();
            assert_eq!(&buf[..size], b"putback");

            let size = stream.read_some(&mut buf).await.unwrap();
            assert_eq!(&buf[..size], b"stream");

            let inner = stream.into_inner();
            assert_eq!(inner.reads, 1);
        });

        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn zero_length_read() {
        let mut fut = pin!(async {
            let stream = Stream::new(FakeStream::new());

            let mut buf = [0; 0];
            assert_eq!(stream.read_some(&mut buf).await.unwrap(), 0);
        });

        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn read_until_keeps_extra() {
        let mut fut = pin!(async {
            let mut inner = FakeStream::new();
            inner.in_data.extend_from_slice(b"line one\r\nline two\r\n");

            let stream = Stream::new(inner);
            let mut buf = LineBuffer::new();

            stream.read_until(&mut buf, b"\r\n").await.unwrap();

            assert_eq!(buf.get_line(), b"line one");
            assert_eq!(buf.data(), b"line two\r\n");
        });

        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn writes_serialized_in_submission_order() {
        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);

        let stream = Stream::new(FakeStream::new());
        stream.inner.borrow().write_budget.set(4);

        let bufs1: [&[u8]; 2] = [b"aaa", b"aaa"];
        let bufs2: [&[u8]; 1] = [b"bbb"];

        let mut fut1 = pin!(stream.write_all(&bufs1));
        let mut fut2 = pin!(stream.write_all(&bufs2));

        // the second submission parks until the first completes, even
        // when polled first
        assert!(fut2.as_mut().poll(&mut cx).is_pending());

        // the first submission makes partial progress, then suspends
        assert!(fut1.as_mut().poll(&mut cx).is_pending());
        assert_eq!(stream.inner.borrow().out_data, b"aaaa");

        stream.inner.borrow().write_budget.set(usize::MAX);

        // still not the second submission's turn
        assert!(fut2.as_mut().poll(&mut cx).is_pending());
        assert_eq!(stream.inner.borrow().out_data, b"aaaa");

        match fut1.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(size)) => assert_eq!(size, 6),
            _ => unreachable!(),
        }

        match fut2.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(size)) => assert_eq!(size, 3),
            _ => unreachable!(),
        }

        assert_eq!(stream.inner.borrow().out_data, b"aaaaaabbb");
    }

    #[test]
    fn abandoned_write_does_not_stall() {
        let waker = Arc::new(NoopWaker).into();
        let mut cx = Context::from_waker(&waker);

        let stream = Stream::new(FakeStream::new());

        let bufs1: [&[u8]; 1] = [b"first"];
        let bufs2: [&[u8]; 1] = [b"second"];

        {
            let _dropped = stream.write_all(&bufs1);
        }

        let mut fut2 = pin!(stream.write_all(&bufs2));

        match fut2.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(size)) => assert_eq!(size, 6),
            _ => unreachable!(),
        }

        assert_eq!(stream.inner.borrow().out_data, b"second");
    }
}
