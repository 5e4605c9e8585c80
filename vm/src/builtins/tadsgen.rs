//! The `tads-gen` function set: type inspection, object enumeration,
//! conversions, randomness, time and the undo/save entry points.

use std::cmp::Ordering;
use std::time::UNIX_EPOCH;

use object::{ObjId, ObjectBody, Val};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::VM;
use crate::builtins::{BuiltinDesc, expect_int_bif};
use crate::error::{ErrorCode, RuntimeError};
use crate::primitives::Arity;
use crate::stack::Stack;

pub static FUNCTIONS: &[BuiltinDesc] = &[
    BuiltinDesc::new("dataType", Arity::Exact(1), gen_data_type),
    BuiltinDesc::new("getArg", Arity::Exact(1), gen_get_arg),
    BuiltinDesc::new("firstObj", Arity::Range(0, 2), gen_first_obj),
    BuiltinDesc::new("nextObj", Arity::Range(1, 3), gen_next_obj),
    BuiltinDesc::new("randomize", Arity::Exact(0), gen_randomize),
    BuiltinDesc::new("rand", Arity::AtLeast(0), gen_rand),
    BuiltinDesc::new("toString", Arity::Range(1, 2), gen_to_string),
    BuiltinDesc::new("toInteger", Arity::Range(1, 2), gen_to_integer),
    BuiltinDesc::new("getTime", Arity::Range(0, 1), gen_get_time),
    BuiltinDesc::new("rexMatch", Arity::AtLeast(0), gen_regex),
    BuiltinDesc::new("rexSearch", Arity::AtLeast(0), gen_regex),
    BuiltinDesc::new("rexGroup", Arity::AtLeast(0), gen_regex),
    BuiltinDesc::new("rexReplace", Arity::AtLeast(0), gen_regex),
    BuiltinDesc::new("savepoint", Arity::Exact(0), gen_savepoint),
    BuiltinDesc::new("undo", Arity::Exact(0), gen_undo),
    BuiltinDesc::new("saveGame", Arity::Range(1, 2), gen_save_game),
    BuiltinDesc::new("restoreGame", Arity::Exact(1), gen_restore_game),
    BuiltinDesc::new("restartGame", Arity::Exact(0), gen_restart_game),
    BuiltinDesc::new("max", Arity::AtLeast(1), gen_max),
    BuiltinDesc::new("min", Arity::AtLeast(1), gen_min),
    BuiltinDesc::new("makeString", Arity::Range(1, 2), gen_make_string),
    BuiltinDesc::new("getFuncParams", Arity::Exact(1), gen_get_func_params),
    BuiltinDesc::new("toNumber", Arity::Range(1, 2), gen_to_integer),
    BuiltinDesc::new("sprintf", Arity::AtLeast(1), gen_sprintf),
    BuiltinDesc::new("makeList", Arity::Range(1, 2), gen_make_list),
    BuiltinDesc::new("abs", Arity::Exact(1), gen_abs),
    BuiltinDesc::new("sgn", Arity::Exact(1), gen_sgn),
    BuiltinDesc::new("concat", Arity::AtLeast(0), gen_concat),
];

pub const DATA_TYPE: u16 = 0;
pub const GET_ARG: u16 = 1;
pub const FIRST_OBJ: u16 = 2;
pub const NEXT_OBJ: u16 = 3;
pub const RAND: u16 = 5;
pub const SAVEPOINT: u16 = 13;
pub const UNDO: u16 = 14;
pub const SAVE_GAME: u16 = 15;
pub const RESTORE_GAME: u16 = 16;
pub const RESTART_GAME: u16 = 17;
pub const ABS: u16 = 25;

// firstObj/nextObj flags
const ENUM_INSTANCES: i32 = 0x0001;
const ENUM_CLASSES: i32 = 0x0002;

// getTime() kinds
const GET_TIME_DATE_AND_TIME: i32 = 1;
const GET_TIME_TICKS: i32 = 2;

fn bad_val(what: &str) -> RuntimeError {
    RuntimeError::with(ErrorCode::BadValBif, what)
}

pub fn gen_data_type(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let v = args[0];
    // heap strings and lists report as their constant counterparts
    let code = match v {
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::String(_)) => Val::SString(0).type_code(),
            Some(ObjectBody::List(_)) => Val::List(0).type_code(),
            _ => v.type_code(),
        },
        _ => v.type_code(),
    };
    Ok(Val::Int(code as i32))
}

/// Argument `n` (1-based) of the calling function.
pub fn gen_get_arg(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let n = expect_int_bif(args[0])?;
    if vm.fp == 0 || n < 1 || n as usize > vm.stack.argc(vm.fp) {
        return Err(bad_val("argument index out of range"));
    }
    Ok(vm.stack.get(Stack::arg_index(vm.fp, n as usize - 1)?))
}

fn enum_objects(vm: &VM, args: &[Val], start: u32) -> Result<Val, RuntimeError> {
    let (class, flags) = match args {
        [] => (None, ENUM_INSTANCES),
        [Val::Int(f)] => (None, *f),
        [Val::Obj(c)] => (Some(*c), ENUM_INSTANCES),
        [Val::Obj(c), Val::Int(f)] => (Some(*c), *f),
        _ => return Err(RuntimeError::new(ErrorCode::BadTypeBif)),
    };
    for raw in start..vm.heap.objects().id_limit() {
        let id = ObjId(raw);
        let Some(body) = vm.heap.get(id) else {
            continue;
        };
        let is_class = match body {
            // modifiers are part of their intrinsic class
            ObjectBody::IntClassMod(_) => continue,
            ObjectBody::Tads(t) => t.is_class,
            ObjectBody::IntrinsicClass(_) => true,
            _ => false,
        };
        let wanted = if is_class { ENUM_CLASSES } else { ENUM_INSTANCES };
        if flags & wanted == 0 {
            continue;
        }
        let matches = match class {
            Some(c) => vm.is_kind_of(Val::Obj(id), c),
            None => !matches!(body, ObjectBody::String(_) | ObjectBody::List(_)),
        };
        if matches {
            return Ok(Val::Obj(id));
        }
    }
    Ok(Val::Nil)
}

pub fn gen_first_obj(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    enum_objects(vm, args, 1)
}

pub fn gen_next_obj(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let prev = args[0].as_obj().ok_or(RuntimeError::new(ErrorCode::ObjValReqd))?;
    enum_objects(vm, &args[1..], prev.0 + 1)
}

pub fn gen_randomize(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    let seed = vm.host.random_seed();
    vm.rng = StdRng::seed_from_u64(seed);
    Ok(Val::Nil)
}

/// `rand()`: a non-negative integer; `rand(n)`: `0..n-1`; `rand(list)`: a
/// random element; `rand(a, b, ...)`: one of the arguments.
pub fn gen_rand(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match args {
        [] => Ok(Val::Int((vm.rng.random::<u32>() >> 1) as i32)),
        [Val::Int(n)] => Ok(Val::Int(if *n > 0 { vm.rng.random_range(0..*n) } else { 0 })),
        [v] => {
            if let Some(items) = vm.list_like_elements(*v) {
                if items.is_empty() {
                    return Ok(Val::Nil);
                }
                let i = vm.rng.random_range(0..items.len());
                return Ok(items[i]);
            }
            if vm.string_bytes(*v).is_some() {
                return Err(bad_val("random string templates are not supported"));
            }
            Err(RuntimeError::new(ErrorCode::BadTypeBif))
        }
        _ => {
            let i = vm.rng.random_range(0..args.len());
            Ok(args[i])
        }
    }
}

fn int_to_radix(n: i32, radix: u32) -> String {
    if radix == 10 {
        return n.to_string();
    }
    let mut v = n as u32;
    let mut digits = Vec::new();
    loop {
        let d = std::char::from_digit(v % radix, radix).unwrap_or('0');
        digits.push(d.to_ascii_uppercase());
        v /= radix;
        if v == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

fn radix_arg(args: &[Val]) -> Result<u32, RuntimeError> {
    match args.get(1) {
        None => Ok(10),
        Some(v) => {
            let r = expect_int_bif(*v)?;
            if !(2..=36).contains(&r) {
                return Err(bad_val("radix must be 2 to 36"));
            }
            Ok(r as u32)
        }
    }
}

pub fn gen_to_string(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let radix = radix_arg(args)?;
    let bytes = match args[0] {
        Val::Int(n) => int_to_radix(n, radix).into_bytes(),
        v => vm.to_display_bytes(v)?,
    };
    Ok(vm.new_string(bytes))
}

/// Leading integer of `text` in `radix`; `"nil"` and `"true"` convert to
/// their logical values.
fn parse_int(text: &str, radix: u32) -> Val {
    let t = text.trim();
    match t {
        "nil" => return Val::Nil,
        "true" => return Val::True,
        _ => {}
    }
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let mut acc: i32 = 0;
    for d in digits.chars().map_while(|c| c.to_digit(radix)) {
        acc = acc.wrapping_mul(radix as i32).wrapping_add(d as i32);
    }
    Val::Int(if neg { acc.wrapping_neg() } else { acc })
}

pub fn gen_to_integer(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match args[0] {
        Val::Int(n) => Ok(Val::Int(n)),
        Val::True => Ok(Val::Int(1)),
        Val::Nil => Ok(Val::Int(0)),
        v => {
            let bytes = vm.string_bytes(v).ok_or(RuntimeError::new(ErrorCode::StringValReqd))?;
            let radix = radix_arg(args)?;
            Ok(parse_int(&String::from_utf8_lossy(&bytes), radix))
        }
    }
}

// ── Time ──

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// `[year, month, day, weekday (1 = Sunday), day of year, hour, minute,
/// second, seconds since 1970]`, in UTC.
fn date_time_list(secs: i64) -> Vec<Val> {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let weekday = (days + 4).rem_euclid(7) + 1;
    let yearday = days - days_from_civil(year, 1, 1) + 1;
    [year, month, day, weekday, yearday, rem / 3600, rem % 3600 / 60, rem % 60, secs]
        .into_iter()
        .map(|n| Val::Int(n as i32))
        .collect()
}

pub fn gen_get_time(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let kind = match args.first() {
        Some(v) => expect_int_bif(*v)?,
        None => GET_TIME_DATE_AND_TIME,
    };
    match kind {
        GET_TIME_DATE_AND_TIME => {
            let secs = match vm.host.wall_clock().duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_secs() as i64,
                Err(e) => -(e.duration().as_secs() as i64),
            };
            let items = date_time_list(secs);
            Ok(vm.new_list(items))
        }
        GET_TIME_TICKS => Ok(Val::Int((vm.host.ticks_ms() & 0x7fff_ffff) as i32)),
        _ => Err(bad_val("unknown time type")),
    }
}

pub fn gen_regex(_vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Err(bad_val("regular expressions are not supported"))
}

pub fn gen_sprintf(_vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Err(bad_val("sprintf is not supported"))
}

// ── Undo and saved state ──

pub fn gen_savepoint(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    vm.savepoint();
    Ok(Val::Nil)
}

/// True if a savepoint was rolled back, nil if there was none.
pub fn gen_undo(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    Ok(Val::bool(vm.undo().is_ok()))
}

/// `saveGame(name, [metadata])`: metadata is a LookupTable of strings.
pub fn gen_save_game(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let name = vm.string_value(args[0]).ok_or(RuntimeError::new(ErrorCode::StringValReqd))?;
    let mut metadata = Vec::new();
    if let Some(meta) = args.get(1).filter(|v| !v.is_nil()) {
        let table = meta
            .as_obj()
            .and_then(|id| vm.heap.get(id))
            .and_then(ObjectBody::as_lookup_table)
            .ok_or(RuntimeError::new(ErrorCode::BadTypeBif))?;
        for (k, v) in table.pairs() {
            match (vm.string_value(k), vm.string_value(v)) {
                (Some(k), Some(v)) => metadata.push((k, v)),
                _ => return Err(RuntimeError::new(ErrorCode::BadTypeBif)),
            }
        }
    }
    let mut out = vm.host.create_save(&name).map_err(|e| bad_val(&e.to_string()))?;
    vm.save_state(&mut out, &metadata)?;
    Ok(Val::Nil)
}

pub fn gen_restore_game(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let name = vm.string_value(args[0]).ok_or(RuntimeError::new(ErrorCode::StringValReqd))?;
    let mut input = vm.host.open_save(&name).map_err(|e| bad_val(&e.to_string()))?;
    vm.restore_state(&mut input)?;
    Ok(Val::Nil)
}

pub fn gen_restart_game(vm: &mut VM, _args: &[Val]) -> Result<Val, RuntimeError> {
    vm.restart()?;
    Ok(Val::Nil)
}

// ── Values ──

fn extreme(vm: &VM, args: &[Val], keep: Ordering) -> Result<Val, RuntimeError> {
    let mut best = args[0];
    for v in &args[1..] {
        if vm.compare(*v, best)? == keep {
            best = *v;
        }
    }
    Ok(best)
}

pub fn gen_max(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    extreme(vm, args, Ordering::Greater)
}

pub fn gen_min(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    extreme(vm, args, Ordering::Less)
}

fn count_arg(args: &[Val]) -> Result<usize, RuntimeError> {
    match args.get(1) {
        None => Ok(1),
        Some(v) => usize::try_from(expect_int_bif(*v)?).map_err(|_| bad_val("negative count")),
    }
}

/// `makeString(val, [count])`: a string repeated, or the characters with
/// the given code point(s), `count` times.
pub fn gen_make_string(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let count = count_arg(args)?;
    let code_point = |n: i32| {
        u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .ok_or(bad_val("invalid character code"))
    };
    let unit: String = match args[0] {
        Val::Int(n) => code_point(n)?.to_string(),
        v => match vm.string_bytes(v) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => {
                let items = vm.list_like_elements(v).ok_or(RuntimeError::new(ErrorCode::BadTypeBif))?;
                items
                    .into_iter()
                    .map(|i| code_point(expect_int_bif(i)?))
                    .collect::<Result<String, RuntimeError>>()?
            }
        },
    };
    Ok(vm.new_string(unit.repeat(count).into_bytes()))
}

pub fn gen_make_list(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let count = count_arg(args)?;
    Ok(vm.new_list(vec![args[0]; count]))
}

/// `[min args, optional args, varargs?]` of a function.
pub fn gen_get_func_params(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let entry = match args[0] {
        Val::FuncPtr(ofs) | Val::CodeOfs(ofs) => ofs,
        Val::Obj(id) => match vm.heap.get(id) {
            Some(ObjectBody::AnonFn(elements)) => match elements.first() {
                Some(Val::FuncPtr(ofs)) => *ofs,
                _ => return Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
            },
            _ => return Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
        },
        _ => return Err(RuntimeError::new(ErrorCode::FuncPtrValReqd)),
    };
    let header = vm.header_at(entry)?;
    let items = vec![
        Val::Int(header.min_argc as i32),
        Val::Int(header.opt_argc as i32),
        Val::bool(header.varargs),
    ];
    Ok(vm.new_list(items))
}

pub fn gen_abs(_vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match args[0] {
        Val::Int(n) => Ok(Val::Int(n.wrapping_abs())),
        _ => Err(RuntimeError::new(ErrorCode::NumValReqd)),
    }
}

pub fn gen_sgn(_vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    match args[0] {
        Val::Int(n) => Ok(Val::Int(n.signum())),
        _ => Err(RuntimeError::new(ErrorCode::NumValReqd)),
    }
}

pub fn gen_concat(vm: &mut VM, args: &[Val]) -> Result<Val, RuntimeError> {
    let mut out = Vec::new();
    for v in args {
        out.extend(vm.to_display_bytes(*v)?);
    }
    Ok(vm.new_string(out))
}
