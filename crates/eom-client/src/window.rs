//! Native window handles for `bind_window`

/// A window the output service can place on an external output
pub trait NativeWindow {
    /// Integer handle the service knows the window by, if it has one
    fn native_handle(&self) -> Option<i32>;
}

/// A bare handle obtained elsewhere, e.g. an X11 window id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawWindow(pub i32);

impl NativeWindow for RawWindow {
    /// Zero is never a valid handle
    fn native_handle(&self) -> Option<i32> {
        Some(self.0).filter(|handle| *handle != 0)
    }
}

impl<W: NativeWindow + ?Sized> NativeWindow for &W {
    fn native_handle(&self) -> Option<i32> {
        (**self).native_handle()
    }
}
