//! libclang-backed [`SourceParser`]. Gated behind the `libclang` cargo
//! feature; the library is loaded at runtime via clang-sys so the crate
//! builds on machines without a clang installation.

use crate::parser::{Cursor, Inclusion, ParsedUnit, SourceParser};
use clang_sys::*;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_uint};
use std::path::Path;
use std::ptr;
use std::sync::Once;
use symdex_core::{paths, CursorKind, Location, Result, SymdexError};
use tracing::warn;

static LOAD: Once = Once::new();

fn ensure_loaded() {
    LOAD.call_once(|| {
        if let Err(e) = clang_sys::load() {
            warn!("failed to load libclang: {e}");
        }
    });
}

unsafe fn cx_string(s: CXString) -> String {
    let c = clang_getCString(s);
    let out = if c.is_null() {
        String::new()
    } else {
        CStr::from_ptr(c).to_string_lossy().into_owned()
    };
    clang_disposeString(s);
    out
}

unsafe fn file_path(file: CXFile) -> Option<String> {
    if file.is_null() {
        return None;
    }
    let name = cx_string(clang_getFileName(file));
    if name.is_empty() {
        return None;
    }
    Some(paths::canonical_str(&name))
}

#[derive(Default)]
pub struct ClangParser;

impl ClangParser {
    pub fn new() -> Self {
        ensure_loaded();
        Self
    }
}

impl SourceParser for ClangParser {
    fn parse(&self, input: &str, args: &[String]) -> Result<Box<dyn ParsedUnit + '_>> {
        let c_input = CString::new(input)
            .map_err(|_| SymdexError::Parse(format!("input path contains NUL: {input}")))?;
        let c_args: Vec<CString> = args
            .iter()
            .filter_map(|a| CString::new(a.as_str()).ok())
            .collect();
        let arg_ptrs: Vec<*const c_char> = c_args.iter().map(|a| a.as_ptr()).collect();

        unsafe {
            let index = clang_createIndex(1, 1);
            let unit = clang_parseTranslationUnit(
                index,
                c_input.as_ptr(),
                arg_ptrs.as_ptr(),
                arg_ptrs.len() as i32,
                ptr::null_mut(),
                0,
                CXTranslationUnit_Incomplete,
            );
            if unit.is_null() {
                clang_disposeIndex(index);
                return Err(SymdexError::Parse(format!("no translation unit: {input}")));
            }
            Ok(Box::new(ClangUnit { index, unit }))
        }
    }
}

struct ClangUnit {
    index: CXIndex,
    unit: CXTranslationUnit,
}

// The unit is only ever used from the worker that parsed it, but ownership
// moves across the spawn boundary.
unsafe impl Send for ClangUnit {}

impl Drop for ClangUnit {
    fn drop(&mut self) {
        unsafe {
            clang_disposeTranslationUnit(self.unit);
            clang_disposeIndex(self.index);
        }
    }
}

extern "C" fn inclusion_trampoline(
    file: CXFile,
    stack: *mut CXSourceLocation,
    stack_len: c_uint,
    data: CXClientData,
) {
    let out = unsafe { &mut *(data as *mut Vec<Inclusion>) };
    let Some(path) = (unsafe { file_path(file) }) else {
        return;
    };
    let mut frames = Vec::with_capacity(stack_len as usize);
    for i in 0..stack_len as isize {
        unsafe {
            let mut frame_file: CXFile = ptr::null_mut();
            clang_getSpellingLocation(
                *stack.offset(i),
                &mut frame_file,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if let Some(frame) = file_path(frame_file) {
                frames.push(frame);
            }
        }
    }
    out.push(Inclusion {
        file: path,
        stack: frames,
    });
}

extern "C" fn visit_trampoline(
    cursor: CXCursor,
    _parent: CXCursor,
    data: CXClientData,
) -> CXChildVisitResult {
    let callback = unsafe { &mut *(data as *mut &mut dyn FnMut(CXCursor)) };
    callback(cursor);
    CXChildVisit_Recurse
}

impl ParsedUnit for ClangUnit {
    fn inclusions(&self) -> Vec<Inclusion> {
        let mut out: Vec<Inclusion> = Vec::new();
        unsafe {
            clang_getInclusions(
                self.unit,
                inclusion_trampoline,
                &mut out as *mut _ as CXClientData,
            );
        }
        out
    }

    fn visit<'u>(&'u self, visitor: &mut dyn FnMut(&dyn Cursor<'u>)) {
        let mut shim = |raw: CXCursor| {
            let cursor = ClangCursor {
                raw,
                _unit: PhantomData,
            };
            visitor(&cursor);
        };
        let mut callback: &mut dyn FnMut(CXCursor) = &mut shim;
        unsafe {
            clang_visitChildren(
                clang_getTranslationUnitCursor(self.unit),
                visit_trampoline,
                &mut callback as *mut _ as CXClientData,
            );
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| SymdexError::PchSave("artifact path contains NUL".to_string()))?;
        let status = unsafe {
            clang_saveTranslationUnit(self.unit, c_path.as_ptr(), clang_defaultSaveOptions(self.unit))
        };
        if status != CXSaveError_None {
            return Err(SymdexError::PchSave(format!(
                "save failed with status {status} for {}",
                path.display()
            )));
        }
        Ok(())
    }
}

struct ClangCursor<'u> {
    raw: CXCursor,
    _unit: PhantomData<&'u ClangUnit>,
}

impl<'u> ClangCursor<'u> {
    fn wrap(raw: CXCursor) -> Option<Box<dyn Cursor<'u> + 'u>> {
        unsafe {
            if clang_Cursor_isNull(raw) != 0 {
                return None;
            }
            if clang_isInvalid(clang_getCursorKind(raw)) != 0 {
                return None;
            }
        }
        Some(Box::new(ClangCursor {
            raw,
            _unit: PhantomData,
        }))
    }
}

impl<'u> Cursor<'u> for ClangCursor<'u> {
    fn kind(&self) -> CursorKind {
        CursorKind::from_raw(unsafe { clang_getCursorKind(self.raw) } as u32)
    }

    fn spelling(&self) -> String {
        unsafe { cx_string(clang_getCursorSpelling(self.raw)) }
    }

    fn display_name(&self) -> String {
        unsafe { cx_string(clang_getCursorDisplayName(self.raw)) }
    }

    fn location(&self) -> Option<Location> {
        unsafe {
            let location = clang_getCursorLocation(self.raw);
            if clang_equalLocations(location, clang_getNullLocation()) != 0 {
                return None;
            }
            let mut file: CXFile = ptr::null_mut();
            let mut offset: c_uint = 0;
            clang_getSpellingLocation(
                location,
                &mut file,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut offset,
            );
            file_path(file).map(|path| Location::new(path, offset))
        }
    }

    fn referenced(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        ClangCursor::wrap(unsafe { clang_getCursorReferenced(self.raw) })
    }

    fn definition(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        ClangCursor::wrap(unsafe { clang_getCursorDefinition(self.raw) })
    }

    fn semantic_parent(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        ClangCursor::wrap(unsafe { clang_getCursorSemanticParent(self.raw) })
    }

    fn is_definition(&self) -> bool {
        unsafe { clang_isCursorDefinition(self.raw) != 0 }
    }

    fn raw_id(&self) -> u64 {
        u64::from(unsafe { clang_hashCursor(self.raw) })
    }
}
