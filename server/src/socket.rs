// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thin, non-blocking-aware TCP endpoint wrapper.
//!
//! All I/O goes through `MSG_DONTWAIT`, so a `Socket` never blocks the
//! reactor regardless of the descriptor's file-status flags.

use std::cell::Cell;
use std::io;
use std::mem;
use std::os::fd::RawFd;

const BACKLOG: libc::c_int = 1024;

/// A TCP socket identified by its raw descriptor. Closes on drop.
#[derive(Debug)]
pub struct Socket {
    fd: Cell<RawFd>,
}

impl Socket {
    /// Wraps an already-open descriptor, taking ownership of it.
    pub fn from_fd(fd: RawFd) -> Socket {
        Socket { fd: Cell::new(fd) }
    }

    /// Creates a fresh `AF_INET` stream socket.
    pub fn create() -> io::Result<Socket> {
        let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM, 0))?;
        Ok(Socket::from_fd(fd))
    }

    /// The raw descriptor, or -1 after close.
    pub fn fd(&self) -> RawFd {
        self.fd.get()
    }

    /// Binds to `0.0.0.0:port`.
    pub fn bind(&self, port: u16) -> io::Result<()> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();
        syscall!(bind(
            self.fd.get(),
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ))?;
        Ok(())
    }

    /// Starts listening.
    pub fn listen(&self) -> io::Result<()> {
        syscall!(listen(self.fd.get(), BACKLOG))?;
        Ok(())
    }

    /// Connects to `ip:port`.
    pub fn connect(&self, ip: std::net::Ipv4Addr, port: u16) -> io::Result<()> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from(ip).to_be();
        syscall!(connect(
            self.fd.get(),
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ))?;
        Ok(())
    }

    /// Accepts one pending connection, returning its descriptor. The caller
    /// takes ownership of the returned fd.
    pub fn accept(&self) -> io::Result<RawFd> {
        syscall!(accept(
            self.fd.get(),
            std::ptr::null_mut(),
            std::ptr::null_mut()
        ))
    }

    /// Non-blocking receive. `Ok(0)` means the peer closed its write half;
    /// would-block and interrupts surface as errors of the matching kind.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::recv(
                self.fd.get(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Non-blocking send of as much of `buf` as the kernel will take.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = unsafe {
            libc::send(
                self.fd.get(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Sets `O_NONBLOCK` on the descriptor.
    pub fn set_nonblocking(&self) -> io::Result<()> {
        let flags = syscall!(fcntl(self.fd.get(), libc::F_GETFL))?;
        syscall!(fcntl(self.fd.get(), libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        Ok(())
    }

    /// Allows rebinding an address still in TIME_WAIT. Must run before bind.
    pub fn reuse_address(&self) -> io::Result<()> {
        let val: libc::c_int = 1;
        syscall!(setsockopt(
            self.fd.get(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &val as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))?;
        syscall!(setsockopt(
            self.fd.get(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &val as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))?;
        Ok(())
    }

    /// Closes the descriptor. Safe to call more than once.
    pub fn close(&self) {
        let fd = self.fd.replace(-1);
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
        }
    }

    /// Creates a listening server socket on `port`: create, reuse address,
    /// bind, listen, and switch to non-blocking accepts.
    pub fn create_server(port: u16) -> io::Result<Socket> {
        let socket = Socket::create()?;
        socket.reuse_address()?;
        socket.bind(port)?;
        socket.listen()?;
        socket.set_nonblocking()?;
        Ok(socket)
    }

    /// Creates a socket connected to `ip:port`.
    pub fn create_client(ip: std::net::Ipv4Addr, port: u16) -> io::Result<Socket> {
        let socket = Socket::create()?;
        socket.connect(ip, port)?;
        Ok(socket)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}
