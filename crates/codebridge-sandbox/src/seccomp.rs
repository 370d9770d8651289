//! Seccomp BPF filter loaded by bwrap (`--seccomp <fd>`).
//!
//! Network egress is cut at the syscall level: `socket()` is denied for every
//! address family except AF_UNIX, which the bridge needs. Also denied:
//! - ptrace, mount/umount2, pivot_root, chroot
//! - keyctl, kexec_load/kexec_file_load
//! - clone/unshare with CLONE_NEWUSER
//! - x32 ABI syscalls on x86_64
//!
//! `clone3` fails with ENOSYS: its flags live behind a pointer the filter
//! cannot inspect, and libc falls back to `clone`.
//!
//! Architecture support: x86_64 and aarch64. A syscall made under a different
//! audit architecture is denied.

#![cfg(target_os = "linux")]

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

const AF_UNIX: u32 = 1;
const CLONE_NEWUSER: u32 = 0x10000000;

#[cfg(target_arch = "x86_64")]
mod arch {
    pub const AUDIT_ARCH: u32 = 0xC000_003E;
    pub const SOCKET: u32 = 41;
    pub const PTRACE: u32 = 101;
    pub const MOUNT: u32 = 165;
    pub const UMOUNT2: u32 = 166;
    pub const CLONE: u32 = 56;
    pub const KEYCTL: u32 = 250;
    pub const KEXEC_LOAD: u32 = 246;
    pub const KEXEC_FILE_LOAD: u32 = 320;
    pub const PIVOT_ROOT: u32 = 155;
    pub const CHROOT: u32 = 161;
    pub const UNSHARE: u32 = 272;
    pub const CLONE3: u32 = 435;
    pub const X32_SYSCALL_BIT: Option<u32> = Some(0x4000_0000);
}

#[cfg(target_arch = "aarch64")]
mod arch {
    pub const AUDIT_ARCH: u32 = 0xC000_00B7;
    pub const SOCKET: u32 = 198;
    pub const PTRACE: u32 = 117;
    pub const MOUNT: u32 = 40;
    pub const UMOUNT2: u32 = 39;
    pub const CLONE: u32 = 220;
    pub const KEYCTL: u32 = 219;
    pub const KEXEC_LOAD: u32 = 104;
    pub const KEXEC_FILE_LOAD: u32 = 294;
    pub const PIVOT_ROOT: u32 = 41;
    pub const CHROOT: u32 = 51;
    pub const UNSHARE: u32 = 97;
    pub const CLONE3: u32 = 435;
    pub const X32_SYSCALL_BIT: Option<u32> = None;
}

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const EPERM: u32 = 1;
const ENOSYS: u32 = 38;

// BPF instruction codes
const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_ALU: u16 = 0x04;
const BPF_AND: u16 = 0x50;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

// struct seccomp_data offsets
const SECCOMP_DATA_NR: u32 = 0;
const SECCOMP_DATA_ARCH: u32 = 4;
const SECCOMP_DATA_ARGS: u32 = 16;

/// One `struct sock_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        Self { code, jt, jf, k }
    }

    fn to_bytes(self) -> [u8; 8] {
        let mut b = [0u8; 8];
        b[0..2].copy_from_slice(&self.code.to_ne_bytes());
        b[2] = self.jt;
        b[3] = self.jf;
        b[4..8].copy_from_slice(&self.k.to_ne_bytes());
        b
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub fn build_filter() -> Vec<SockFilter> {
    use arch::*;

    let deny = SockFilter::new(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ERRNO | EPERM);
    let allow = SockFilter::new(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW);
    let load_nr = SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR);
    let load_arg0 = SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARGS);

    let mut f = Vec::with_capacity(40);

    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARCH));
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, AUDIT_ARCH));
    f.push(deny);
    f.push(load_nr);

    if let Some(x32) = X32_SYSCALL_BIT {
        f.push(SockFilter::new(BPF_JMP | BPF_JGE | BPF_K, 0, 1, x32));
        f.push(deny);
    }

    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, CLONE3));
    f.push(SockFilter::new(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ERRNO | ENOSYS));

    for nr in [PTRACE, MOUNT, UMOUNT2, KEYCTL, KEXEC_LOAD, KEXEC_FILE_LOAD, PIVOT_ROOT, CHROOT] {
        f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, nr));
        f.push(deny);
    }

    // clone / unshare: deny when CLONE_NEWUSER is set, then reload nr
    for nr in [CLONE, UNSHARE] {
        f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 4, nr));
        f.push(load_arg0);
        f.push(SockFilter::new(BPF_ALU | BPF_AND | BPF_K, 0, 0, CLONE_NEWUSER));
        f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, CLONE_NEWUSER));
        f.push(deny);
        f.push(load_nr);
    }

    // socket: only AF_UNIX passes
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 3, SOCKET));
    f.push(load_arg0);
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, AF_UNIX));
    f.push(deny);
    f.push(allow);

    f
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn build_filter() -> Vec<SockFilter> {
    Vec::new()
}

/// Serialised program in the layout bwrap reads from its `--seccomp` fd.
pub fn filter_bytes() -> Vec<u8> {
    build_filter().into_iter().flat_map(SockFilter::to_bytes).collect()
}

/// Write the program to `path` and reopen it for reading.
pub fn write_filter_file(path: &Path) -> io::Result<File> {
    let bytes = filter_bytes();
    if bytes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "seccomp filter is only available on x86_64 and aarch64",
        ));
    }
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    File::open(path)
}
