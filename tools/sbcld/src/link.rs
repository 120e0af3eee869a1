//! Serial link to the AVR-SBC
//!
//! [`LinkChannel`] is all a transfer needs from the transport: open it, write
//! bytes in order, close it. [`OpenLink`] makes sure the close happens on every
//! way out of a session.

use std::io::{self, Write};
use std::thread::sleep;
use std::time::Duration;

use dialoguer::Select;
use dialoguer::console::style;
use serialport::{SerialPort, SerialPortInfo, available_ports};
use tracing::{debug, info, warn};

use crate::error::{LoadError, Result};

/// The rate the AVR-SBC console runs at.
pub const DEFAULT_BAUD: u32 = 9600;

pub trait LinkChannel {
    /// Something to show the operator, usually the port name.
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    /// Writes all of `bytes` before returning. Order of calls is order on the wire.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Best effort; must be safe to call on a link that failed mid-write.
    fn close(&mut self);
}

impl<L: LinkChannel + ?Sized> LinkChannel for &mut L {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// An opened link. Closes it when dropped.
pub struct OpenLink<'a, L: LinkChannel> {
    link: &'a mut L,
    bytes_written: usize,
}

impl<'a, L: LinkChannel> OpenLink<'a, L> {
    pub fn open(link: &'a mut L) -> Result<Self> {
        link.open()?;
        info!(port = link.name(), "link open");
        Ok(Self {
            link,
            bytes_written: 0,
        })
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.link
            .write_all(bytes)
            .map_err(LoadError::TransportWriteFailure)?;
        self.bytes_written += bytes.len();
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl<L: LinkChannel> Drop for OpenLink<'_, L> {
    fn drop(&mut self) {
        self.link.close();
        info!(port = self.link.name(), bytes = self.bytes_written, "link closed");
    }
}

/// A serial port, opened lazily.
pub struct SerialLink {
    port_name: String,
    baud: u32,
    line_delay: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn new(port_name: impl Into<String>, baud: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud,
            line_delay: Duration::ZERO,
            port: None,
        }
    }

    /// Pause after every write, for interpreters that can't keep up at full rate.
    pub fn with_line_delay(mut self, line_delay: Duration) -> Self {
        self.line_delay = line_delay;
        self
    }
}

impl LinkChannel for SerialLink {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, self.baud)
            .timeout(Duration::from_millis(20000))
            .open()
            .map_err(|e| LoadError::ChannelUnavailable {
                port: self.port_name.clone(),
                source: e.into(),
            })?;
        debug!(port = %self.port_name, baud = self.baud, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))?;
        port.write_all(bytes)?;
        port.flush()?;
        if !self.line_delay.is_zero() {
            sleep(self.line_delay);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                warn!(port = %self.port_name, "flush on close failed: {e}");
            }
        }
    }
}

fn no_port(source: io::Error) -> LoadError {
    LoadError::ChannelUnavailable {
        port: "<any>".to_string(),
        source,
    }
}

/// USB adapters show up as ttyUSB*/cu.usbserial* on unix and COMn on windows.
fn is_usb_serial(name: &str) -> bool {
    name.contains("USB") || name.contains("COM") || name.contains("usb")
}

/// Names of the serial ports that look like a USB adapter or a COM port.
pub fn list_ports() -> Result<Vec<String>> {
    let ports: Vec<SerialPortInfo> = available_ports().map_err(|e| no_port(e.into()))?;
    Ok(ports
        .into_iter()
        .map(|port| port.port_name)
        .filter(|name| is_usb_serial(name))
        .collect())
}

/// Settle on one of `names`; `choose` is only asked when there is more than one.
fn pick_port(
    mut names: Vec<String>,
    choose: impl FnOnce(&[String]) -> Result<usize>,
) -> Result<String> {
    let index = match names.len() {
        0 => {
            return Err(no_port(io::Error::new(
                io::ErrorKind::NotFound,
                "no USB serial ports found, are you in the dialout group?",
            )));
        }
        1 => 0,
        _ => choose(&names)?,
    };
    if index >= names.len() {
        return Err(no_port(io::Error::other(format!("no port #{index}"))));
    }
    Ok(names.swap_remove(index))
}

/// Pick a port for the operator, prompting when several adapters are plugged in.
pub fn select_port() -> Result<String> {
    let port = pick_port(list_ports()?, |names| {
        Select::new()
            .with_prompt("Several USB serial ports found, which one is the AVR-SBC?")
            .default(0)
            .items(names)
            .interact()
            .map_err(|e| no_port(io::Error::other(e.to_string())))
    })?;
    println!("Using {}", style(&port).bold());
    Ok(port)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records everything written; can be told to fail on the n-th write.
    #[derive(Default)]
    pub(crate) struct MemoryLink {
        pub opens: usize,
        pub closes: usize,
        pub writes: Vec<Vec<u8>>,
        pub fail_on_write: Option<usize>,
        pub refuse_open: bool,
    }

    impl LinkChannel for MemoryLink {
        fn name(&self) -> &str {
            "memory"
        }

        fn open(&mut self) -> Result<()> {
            if self.refuse_open {
                return Err(LoadError::ChannelUnavailable {
                    port: "memory".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "refused"),
                });
            }
            self.opens += 1;
            Ok(())
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_on_write == Some(self.writes.len()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    #[test]
    fn guard_closes_on_drop() {
        let mut link = MemoryLink::default();
        {
            let mut open = OpenLink::open(&mut link).unwrap();
            open.send(b"hello").unwrap();
            open.send(&[0]).unwrap();
            assert_eq!(open.bytes_written(), 6);
        }
        assert_eq!(link.opens, 1);
        assert_eq!(link.closes, 1);
        assert_eq!(link.writes, vec![b"hello".to_vec(), vec![0]]);
    }

    #[test]
    fn guard_closes_after_write_failure() {
        let mut link = MemoryLink {
            fail_on_write: Some(1),
            ..Default::default()
        };
        {
            let mut open = OpenLink::open(&mut link).unwrap();
            open.send(b"a").unwrap();
            assert!(matches!(
                open.send(b"b"),
                Err(LoadError::TransportWriteFailure(_))
            ));
        }
        assert_eq!(link.closes, 1);
    }

    #[test]
    fn failed_open_is_not_closed() {
        let mut link = MemoryLink {
            refuse_open: true,
            ..Default::default()
        };
        assert!(matches!(
            OpenLink::open(&mut link),
            Err(LoadError::ChannelUnavailable { .. })
        ));
        assert_eq!(link.closes, 0);
    }

    #[test]
    fn usb_port_names() {
        assert!(is_usb_serial("/dev/ttyUSB0"));
        assert!(is_usb_serial("/dev/cu.usbserial-1420"));
        assert!(is_usb_serial("COM4"));
        assert!(!is_usb_serial("/dev/ttyS0"));
    }

    #[test]
    fn single_port_is_picked_without_asking() {
        let port = pick_port(vec!["COM4".into()], |_| panic!("should not ask")).unwrap();
        assert_eq!(port, "COM4");
    }

    #[test]
    fn several_ports_ask_the_chooser() {
        let names = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()];
        let port = pick_port(names, |offered| {
            assert_eq!(offered.len(), 2);
            Ok(1)
        })
        .unwrap();
        assert_eq!(port, "/dev/ttyUSB1");
    }

    #[test]
    fn no_ports_is_unavailable() {
        assert!(matches!(
            pick_port(vec![], |_| Ok(0)),
            Err(LoadError::ChannelUnavailable { .. })
        ));
        assert!(matches!(
            pick_port(vec!["a".into(), "b".into()], |_| Ok(5)),
            Err(LoadError::ChannelUnavailable { .. })
        ));
    }

    #[test]
    fn serial_link_rejects_writes_before_open() {
        let mut link = SerialLink::new("/dev/does-not-exist", DEFAULT_BAUD);
        let err = link.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        // closing a never-opened port is a no-op
        link.close();
    }
}
