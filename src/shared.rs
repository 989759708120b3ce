//! Shared memory backend.
//!
//! A backend designed to be attached to several CPUs at the same time.
//! All accesses funnel through one command channel to an agent thread
//! that owns the half-word vector; the agent executes one command to
//! completion before taking the next, so every access across every
//! attached CPU lands in a single global order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use log::{debug, trace};

use crate::cpu::memory::{MemoryBackend, MemoryError};

enum Command {
    FetchHalf {
        addr: u32,
        reply: Sender<Result<u16, MemoryError>>,
    },
    FetchWord {
        addr: u32,
        reply: Sender<Result<u32, MemoryError>>,
    },
    WriteHalf {
        addr: u32,
        value: u16,
        reply: Sender<Result<u16, MemoryError>>,
    },
    WriteWord {
        addr: u32,
        value: u32,
        reply: Sender<Result<u32, MemoryError>>,
    },
    Shutdown,
}

/// Handle to a serialized half-word store.
///
/// Clones share the same agent; register one clone per CPU. The agent
/// thread lives until [`SharedMemory::shutdown`] is called or every
/// handle has been dropped. Operations after shutdown fail with
/// [`MemoryError::BackendClosed`].
#[derive(Clone)]
pub struct SharedMemory {
    cmd: Sender<Command>,
}

impl SharedMemory {
    /// Create a zero-filled shared memory of `size` half-word cells and
    /// spawn its agent.
    pub fn new(size: u32) -> Self {
        let (cmd, commands) = mpsc::channel();
        let agent = Agent {
            memory: vec![0; size as usize],
            commands,
        };
        thread::spawn(move || agent.run());

        Self { cmd }
    }

    /// Ask the agent to exit. Queued and later requests fail with
    /// [`MemoryError::BackendClosed`].
    pub fn shutdown(&self) {
        let _ = self.cmd.send(Command::Shutdown);
    }

    /// Send one command and block on its reply.
    fn roundtrip<T>(
        &self,
        build: impl FnOnce(Sender<Result<T, MemoryError>>) -> Command,
    ) -> Result<T, MemoryError> {
        let (reply, response) = mpsc::channel();
        self.cmd
            .send(build(reply))
            .map_err(|_| MemoryError::BackendClosed)?;
        response.recv().map_err(|_| MemoryError::BackendClosed)?
    }
}

impl MemoryBackend for SharedMemory {
    fn fetch_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        self.roundtrip(|reply| Command::FetchHalf { addr, reply })
    }

    fn fetch_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        self.roundtrip(|reply| Command::FetchWord { addr, reply })
    }

    fn write_half(&mut self, addr: u32, value: u16) -> Result<u16, MemoryError> {
        self.roundtrip(|reply| Command::WriteHalf { addr, value, reply })
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<u32, MemoryError> {
        self.roundtrip(|reply| Command::WriteWord { addr, value, reply })
    }
}

/// The owner of the half-word vector. Runs on its own thread, draining
/// the command channel in FIFO order.
struct Agent {
    memory: Vec<u16>,
    commands: Receiver<Command>,
}

impl Agent {
    fn run(mut self) {
        while let Ok(command) = self.commands.recv() {
            match command {
                Command::FetchHalf { addr, reply } => {
                    trace!("shared fetch_half addr={:#x}", addr);
                    let _ = reply.send(self.fetch_half(addr));
                }
                Command::FetchWord { addr, reply } => {
                    trace!("shared fetch_word addr={:#x}", addr);
                    let _ = reply.send(self.fetch_word(addr));
                }
                Command::WriteHalf { addr, value, reply } => {
                    trace!("shared write_half addr={:#x} value={:#x}", addr, value);
                    let _ = reply.send(self.write_half(addr, value));
                }
                Command::WriteWord { addr, value, reply } => {
                    trace!("shared write_word addr={:#x} value={:#x}", addr, value);
                    let _ = reply.send(self.write_word(addr, value));
                }
                Command::Shutdown => {
                    debug!("shared memory agent shutting down");
                    break;
                }
            }
        }
    }

    fn fetch_half(&self, addr: u32) -> Result<u16, MemoryError> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(MemoryError::AddressOutOfRange(addr))
    }

    fn fetch_word(&self, addr: u32) -> Result<u32, MemoryError> {
        let index = addr as usize;
        if index + 1 >= self.memory.len() {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        Ok((u32::from(self.memory[index]) << 16) | u32::from(self.memory[index + 1]))
    }

    fn write_half(&mut self, addr: u32, value: u16) -> Result<u16, MemoryError> {
        let index = addr as usize;
        if index >= self.memory.len() {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        let old = self.memory[index];
        self.memory[index] = value;
        Ok(old)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<u32, MemoryError> {
        let index = addr as usize;
        if index + 1 >= self.memory.len() {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        let old = (u32::from(self.memory[index]) << 16) | u32::from(self.memory[index + 1]);
        self.memory[index] = (value >> 16) as u16;
        self.memory[index + 1] = (value & 0xffff) as u16;
        Ok(old)
    }
}
