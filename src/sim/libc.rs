//! The libc shim.
//!
//! The guest has no operating system; instead, a small fixed table of
//! host-implemented routines stands in for the C library. The linker
//! pre-seeds a global symbol for each routine pointing at a *trampoline
//! address* ([`trampoline_addr`]); when the interpreter observes the PC
//! inside the trampoline range it dispatches to the routine instead of
//! fetching, then returns to the caller by setting the PC to `ra`.
//!
//! Arguments and results follow the RISC-V calling convention (`a0`-`a7`
//! in, `a0` out). Memory errors inside a routine surface as
//! `Libc*` traps carrying the routine's index.

use crate::ast::reg_consts::{A0, RA};
use crate::ast::Reg;

use super::io::Device;
use super::mem::{Mem, RegFile};
use super::SimErr;

/// A libc routine: its guest-visible name and host implementation.
pub struct Routine {
    /// The symbol name the linker exports.
    pub name: &'static str,
    /// The implementation.
    pub run: fn(usize, &mut RegFile, &mut Mem, &mut Device) -> Result<(), SimErr>,
}

/// The libc table. Indices are stable: `trampoline_addr(i)` is the
/// address exported for `ROUTINES[i].name`.
pub static ROUTINES: [Routine; 10] = [
    Routine { name: "exit",    run: libc_exit },
    Routine { name: "putchar", run: libc_putchar },
    Routine { name: "getchar", run: libc_getchar },
    Routine { name: "puts",    run: libc_puts },
    Routine { name: "printf",  run: libc_printf },
    Routine { name: "scanf",   run: libc_scanf },
    Routine { name: "malloc",  run: libc_malloc },
    Routine { name: "calloc",  run: libc_calloc },
    Routine { name: "free",    run: libc_free },
    Routine { name: "sbrk",    run: libc_sbrk },
];

/// The first trampoline address. The range sits below the text section
/// and is never backed by memory contents.
pub const TRAMPOLINE_BASE: u32 = 0x1000;

/// The trampoline address exported for routine `index`.
pub fn trampoline_addr(index: usize) -> u32 {
    TRAMPOLINE_BASE + 4 * index as u32
}

/// The address returning from `main` lands on (the `exit` trampoline).
pub fn exit_addr() -> u32 {
    trampoline_addr(0)
}

/// If `pc` is a trampoline address, the routine index it dispatches to.
pub fn index_of_pc(pc: u32) -> Option<usize> {
    if pc % 4 != 0 || pc < TRAMPOLINE_BASE {
        return None;
    }
    let index = ((pc - TRAMPOLINE_BASE) / 4) as usize;
    (index < ROUTINES.len()).then_some(index)
}

/// Runs the routine at `index` and returns the PC to the caller.
pub fn dispatch(index: usize, rf: &mut RegFile, mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    (ROUTINES[index].run)(index, rf, mem, dev)?;
    rf.pc = rf[RA];
    // Re-arm the default return path: a main that calls into the libc and
    // falls off the end via `ret` without saving `ra` still reaches exit.
    rf.set(RA, exit_addr());
    Ok(())
}

/// Rewraps a memory trap raised inside a libc routine so the diagnostic
/// names the routine instead of a guest instruction.
fn wrap_mem_err(index: usize, err: SimErr) -> SimErr {
    match err {
        SimErr::LoadMisAligned { addr, .. } | SimErr::StoreMisAligned { addr, .. } => {
            SimErr::LibcMisAligned { index, addr }
        },
        SimErr::LoadOutOfBound { addr, .. } | SimErr::StoreOutOfBound { addr, .. } => {
            SimErr::LibcOutOfBound { index, addr }
        },
        other => other,
    }
}

fn libc_err(index: usize, message: impl Into<String>) -> SimErr {
    SimErr::LibcError { index, message: message.into() }
}

/// Reads a NUL-terminated string out of guest memory.
fn read_cstr(index: usize, mem: &Mem, addr: u32) -> Result<Vec<u8>, SimErr> {
    let mut bytes = vec![];
    let mut at = addr;
    loop {
        let b = mem.load_u8(at).map_err(|e| wrap_mem_err(index, e))?;
        if b == 0 {
            return Ok(bytes);
        }
        bytes.push(b);
        at = at.wrapping_add(1);
    }
}

/// The argument registers after `a0`, in calling-convention order.
fn vararg(n: usize) -> Option<Reg> {
    // a1..a7
    (n < 7).then(|| Reg((11 + n) as u8))
}

fn libc_exit(_index: usize, rf: &mut RegFile, _mem: &mut Mem, _dev: &mut Device) -> Result<(), SimErr> {
    rf.halt(rf[A0]);
    Ok(())
}

fn libc_putchar(_index: usize, rf: &mut RegFile, _mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    let byte = rf[A0] as u8;
    dev.write_byte(byte);
    rf.set(A0, u32::from(byte));
    Ok(())
}

fn libc_getchar(_index: usize, rf: &mut RegFile, _mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    let value = match dev.read_byte() {
        Some(b) => u32::from(b),
        None => -1i32 as u32,
    };
    rf.set(A0, value);
    Ok(())
}

// Unlike C's puts, no newline is appended: the guest's strings carry
// their own line endings.
fn libc_puts(index: usize, rf: &mut RegFile, mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    let bytes = read_cstr(index, mem, rf[A0])?;
    dev.write_bytes(&bytes);
    rf.set(A0, 0);
    Ok(())
}

fn libc_printf(index: usize, rf: &mut RegFile, mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    let fmt = read_cstr(index, mem, rf[A0])?;
    let mut out: Vec<u8> = vec![];
    let mut args = 0usize;
    let mut next_arg = || -> Result<u32, SimErr> {
        let reg = vararg(args).ok_or_else(|| libc_err(index, "too many printf arguments"))?;
        args += 1;
        Ok(rf[reg])
    };

    let mut it = fmt.iter().copied();
    while let Some(c) = it.next() {
        if c != b'%' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some(b'd') => out.extend((next_arg()? as i32).to_string().into_bytes()),
            Some(b'u') => out.extend(next_arg()?.to_string().into_bytes()),
            Some(b'x') => out.extend(format!("{:x}", next_arg()?).into_bytes()),
            Some(b'c') => out.push(next_arg()? as u8),
            Some(b's') => {
                let addr = next_arg()?;
                out.extend(read_cstr(index, mem, addr)?);
            },
            Some(b'%') => out.push(b'%'),
            Some(c) => return Err(libc_err(index, format!("unsupported format specifier %{}", c as char))),
            None => return Err(libc_err(index, "format string ends with %")),
        }
    }

    dev.write_bytes(&out);
    rf.set(A0, out.len() as u32);
    Ok(())
}

fn libc_scanf(index: usize, rf: &mut RegFile, mem: &mut Mem, dev: &mut Device) -> Result<(), SimErr> {
    let fmt = read_cstr(index, mem, rf[A0])?;
    let mut args = 0usize;
    let mut assigned = 0u32;
    let mut reached_eof = false;

    // Skips input whitespace, leaving the first non-space byte unread.
    fn skip_space(dev: &mut Device) -> bool {
        loop {
            match dev.read_byte() {
                Some(b) if b.is_ascii_whitespace() => continue,
                Some(b) => {
                    dev.unread_byte(b);
                    return true;
                },
                None => return false,
            }
        }
    }

    let mut it = fmt.iter().copied();
    while let Some(c) = it.next() {
        if c.is_ascii_whitespace() {
            continue;
        }
        if c != b'%' {
            // A literal must match the next input byte.
            if !skip_space(dev) {
                reached_eof = true;
                break;
            }
            match dev.read_byte() {
                Some(b) if b == c => continue,
                Some(b) => {
                    dev.unread_byte(b);
                    break;
                },
                None => {
                    reached_eof = true;
                    break;
                },
            }
        }

        let reg = vararg(args).ok_or_else(|| libc_err(index, "too many scanf arguments"))?;
        args += 1;
        let ptr = rf[reg];

        match it.next() {
            Some(b'd') => {
                if !skip_space(dev) {
                    reached_eof = true;
                    break;
                }
                let mut digits = String::new();
                if let Some(b) = dev.read_byte() {
                    if b == b'-' || b == b'+' || b.is_ascii_digit() {
                        digits.push(b as char);
                    } else {
                        dev.unread_byte(b);
                    }
                }
                while let Some(b) = dev.read_byte() {
                    if b.is_ascii_digit() {
                        digits.push(b as char);
                    } else {
                        dev.unread_byte(b);
                        break;
                    }
                }
                let Ok(value) = digits.parse::<i64>() else { break };
                mem.store_i32(ptr, value as u32).map_err(|e| wrap_mem_err(index, e))?;
                assigned += 1;
            },
            Some(b's') => {
                if !skip_space(dev) {
                    reached_eof = true;
                    break;
                }
                let mut at = ptr;
                let mut any = false;
                while let Some(b) = dev.read_byte() {
                    if b.is_ascii_whitespace() {
                        dev.unread_byte(b);
                        break;
                    }
                    mem.store_i8(at, b).map_err(|e| wrap_mem_err(index, e))?;
                    at = at.wrapping_add(1);
                    any = true;
                }
                if !any {
                    reached_eof = true;
                    break;
                }
                mem.store_i8(at, 0).map_err(|e| wrap_mem_err(index, e))?;
                assigned += 1;
            },
            Some(b'c') => {
                let Some(b) = dev.read_byte() else {
                    reached_eof = true;
                    break;
                };
                mem.store_i8(ptr, b).map_err(|e| wrap_mem_err(index, e))?;
                assigned += 1;
            },
            Some(c) => return Err(libc_err(index, format!("unsupported format specifier %{}", c as char))),
            None => return Err(libc_err(index, "format string ends with %")),
        }
    }

    let result = match (assigned, reached_eof) {
        (0, true) => -1i32 as u32,
        _ => assigned,
    };
    rf.set(A0, result);
    Ok(())
}

fn libc_malloc(_index: usize, rf: &mut RegFile, mem: &mut Mem, _dev: &mut Device) -> Result<(), SimErr> {
    let ptr = mem.alloc(rf[A0]).unwrap_or(0);
    rf.set(A0, ptr);
    Ok(())
}

fn libc_calloc(_index: usize, rf: &mut RegFile, mem: &mut Mem, _dev: &mut Device) -> Result<(), SimErr> {
    use crate::ast::reg_consts::A1;

    let ptr = rf[A0].checked_mul(rf[A1])
        .and_then(|total| mem.alloc(total))
        .unwrap_or(0);
    rf.set(A0, ptr);
    Ok(())
}

fn libc_free(_index: usize, _rf: &mut RegFile, _mem: &mut Mem, _dev: &mut Device) -> Result<(), SimErr> {
    // Allocation is a bump pointer; freed blocks are not reused.
    Ok(())
}

fn libc_sbrk(_index: usize, rf: &mut RegFile, mem: &mut Mem, _dev: &mut Device) -> Result<(), SimErr> {
    let result = match mem.sbrk(rf[A0] as i32) {
        Some(old) => old,
        None => -1i32 as u32,
    };
    rf.set(A0, result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::reg_consts::{A1, A2};
    use crate::sim::io::{Input, Sink};

    fn fixture(input: &[u8]) -> (RegFile, Mem, Device, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let mut mem = Mem::new(0x10000);
        // A little heap to allocate from.
        let _ = mem.sbrk(0); // no-op; heap bounds default to [0, 0)
        let (sink, buf) = Sink::buffer();
        let dev = Device::new(Input::Buffer(input.iter().copied().collect()), sink);
        let rf = RegFile::new(0x1000, 0xFFF0, exit_addr());
        (rf, mem, dev, buf)
    }

    fn put_cstr(mem: &mut Mem, addr: u32, s: &[u8]) {
        for (i, &b) in s.iter().chain([0u8].iter()).enumerate() {
            mem.store_i8(addr + i as u32, b).unwrap();
        }
    }

    fn output(buf: &std::sync::Arc<std::sync::Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buf.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_trampoline_mapping() {
        assert_eq!(index_of_pc(TRAMPOLINE_BASE), Some(0));
        assert_eq!(ROUTINES[0].name, "exit");
        assert_eq!(index_of_pc(trampoline_addr(9)), Some(9));
        assert_eq!(index_of_pc(trampoline_addr(10)), None);
        assert_eq!(index_of_pc(TRAMPOLINE_BASE + 2), None);
        assert_eq!(index_of_pc(0x10000), None);
    }

    #[test]
    fn test_exit_sets_halt() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"");
        rf.set(A0, 42);
        libc_exit(0, &mut rf, &mut mem, &mut dev).unwrap();
        assert!(rf.halted());
        assert_eq!(rf.exit_code(), 42);
    }

    #[test]
    fn test_puts() {
        let (mut rf, mut mem, mut dev, buf) = fixture(b"");
        put_cstr(&mut mem, 0x2000, b"hello\n");
        rf.set(A0, 0x2000);
        libc_puts(3, &mut rf, &mut mem, &mut dev).unwrap();
        assert_eq!(output(&buf), "hello\n");
        assert_eq!(rf[A0], 0);
    }

    #[test]
    fn test_printf_subset() {
        let (mut rf, mut mem, mut dev, buf) = fixture(b"");
        put_cstr(&mut mem, 0x2000, b"i=%d u=%u x=%x c=%c s=%s %%");
        put_cstr(&mut mem, 0x3000, b"str");
        rf.set(A0, 0x2000);
        rf.set(A1, -7i32 as u32);
        rf.set(A2, 0xFFu32);
        rf.set(Reg(13), 0xABCD);
        rf.set(Reg(14), u32::from(b'!'));
        rf.set(Reg(15), 0x3000);
        libc_printf(4, &mut rf, &mut mem, &mut dev).unwrap();
        assert_eq!(output(&buf), "i=-7 u=255 x=abcd c=! s=str %");
    }

    #[test]
    fn test_printf_bad_specifier() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"");
        put_cstr(&mut mem, 0x2000, b"%q");
        rf.set(A0, 0x2000);
        let err = libc_printf(4, &mut rf, &mut mem, &mut dev).unwrap_err();
        assert!(matches!(err, SimErr::LibcError { index: 4, .. }));
    }

    #[test]
    fn test_printf_string_out_of_bounds() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"");
        put_cstr(&mut mem, 0x2000, b"%s");
        rf.set(A0, 0x2000);
        rf.set(A1, 0xFFFF_0000);
        let err = libc_printf(4, &mut rf, &mut mem, &mut dev).unwrap_err();
        assert!(matches!(err, SimErr::LibcOutOfBound { index: 4, .. }));
    }

    #[test]
    fn test_scanf_d_and_s() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"  -42 word more");
        put_cstr(&mut mem, 0x2000, b"%d %s");
        rf.set(A0, 0x2000);
        rf.set(A1, 0x4000);
        rf.set(A2, 0x5000);
        libc_scanf(5, &mut rf, &mut mem, &mut dev).unwrap();

        assert_eq!(rf[A0], 2);
        assert_eq!(mem.load_i32(0x4000).unwrap(), -42);
        let stored = read_cstr(5, &mem, 0x5000).unwrap();
        assert_eq!(stored, b"word");
    }

    #[test]
    fn test_scanf_eof() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"");
        put_cstr(&mut mem, 0x2000, b"%d");
        rf.set(A0, 0x2000);
        rf.set(A1, 0x4000);
        libc_scanf(5, &mut rf, &mut mem, &mut dev).unwrap();
        assert_eq!(rf[A0] as i32, -1);
    }

    #[test]
    fn test_getchar_eof() {
        let (mut rf, mut mem, mut dev, _) = fixture(b"A");
        libc_getchar(2, &mut rf, &mut mem, &mut dev).unwrap();
        assert_eq!(rf[A0], u32::from(b'A'));
        libc_getchar(2, &mut rf, &mut mem, &mut dev).unwrap();
        assert_eq!(rf[A0] as i32, -1);
    }
}
