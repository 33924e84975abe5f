//! HTTP response composer
//!
//! The page is a fixed template with three numeric holes. It is streamed to
//! the socket one fragment at a time; nothing is assembled in RAM.

use crate::sensor::SensorReading;
use crate::transport::{Transport, TransportError};
use core::fmt;

/// Decimal digits kept for an embedded value
pub const VALUE_DIGITS: usize = 3;

const HEADER_AND_STYLE: &str = concat!(
    "HTTP/1.1 200 OK\r\n",
    "Content-Type: text/html\r\n",
    "Connection: close\r\n",
    "Refresh: 5\r\n",
    "\r\n",
    "<!DOCTYPE HTML>\r\n",
    "<html>\r\n",
    "<head>\r\n",
    "    <meta charset=\"UTF-8\">\r\n",
    "    <meta http-equiv=\"refresh\" content=\"5\">\r\n",
    "    <title>ESP32-C3 Sensor Web Server</title>\r\n",
    "    <style>\r\n",
    "        body {\r\n",
    "            font-family: Arial, sans-serif;\r\n",
    "            margin: 0;\r\n",
    "            padding: 0;\r\n",
    "            display: flex;\r\n",
    "            justify-content: center;\r\n",
    "            align-items: center;\r\n",
    "            height: 100vh;\r\n",
    "            background-color: #f4f4f9;\r\n",
    "        }\r\n",
    "        .container {\r\n",
    "            text-align: center;\r\n",
    "            background: #fff;\r\n",
    "            padding: 20px;\r\n",
    "            border-radius: 10px;\r\n",
    "            box-shadow: 0 4px 8px rgba(0,0,0,0.1);\r\n",
    "        }\r\n",
    "        h1 {\r\n",
    "            color: #333;\r\n",
    "        }\r\n",
    "        .gauge {\r\n",
    "            width: 200px;\r\n",
    "            height: 200px;\r\n",
    "            border-radius: 50%;\r\n",
    "            background: conic-gradient(#4caf50 0% 50%, #f44336 50% 100%);\r\n",
    "            position: relative;\r\n",
    "            margin: 20px auto;\r\n",
    "        }\r\n",
    "        .gauge:before {\r\n",
    "            content: '';\r\n",
    "            width: 160px;\r\n",
    "            height: 160px;\r\n",
    "            background: #fff;\r\n",
    "            border-radius: 50%;\r\n",
    "            position: absolute;\r\n",
    "            top: 50%;\r\n",
    "            left: 50%;\r\n",
    "            transform: translate(-50%, -50%);\r\n",
    "        }\r\n",
    "        .gauge:after {\r\n",
    "            content: '",
);

const GAUGE_OPEN: &str = concat!(
    "';\r\n",
    "            font-size: 2em;\r\n",
    "            color: #333;\r\n",
    "            position: absolute;\r\n",
    "            top: 50%;\r\n",
    "            left: 50%;\r\n",
    "            transform: translate(-50%, -50%);\r\n",
    "        }\r\n",
    "    </style>\r\n",
    "</head>\r\n",
    "<body>\r\n",
    "    <div class=\"container\">\r\n",
    "        <h1>ESP32-C3 Sensor Web Server</h1>\r\n",
    "        <div class=\"gauge\" style=\"background: conic-gradient(#4caf50 0% ",
);

const GRADIENT_STOP: &str = "%, #f44336 ";

const GAUGE_CLOSE: &str = concat!(
    "% 100%);\">\r\n",
    "        </div>\r\n",
    "        <p>Analog input 1 is ",
);

const FOOTER: &str = "</p>\r\n</div>\r\n</body>\r\n</html>\r\n";

/// Number of fragments in one response
pub const FRAGMENT_COUNT: usize = 8;

/// A sensor value rendered as base-10 text without leading zeros.
///
/// Values wider than `VALUE_DIGITS` keep their leading digits only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueToken {
    digits: [u8; VALUE_DIGITS],
    len: usize,
}

impl ValueToken {
    pub fn new(value: u16) -> Self {
        // u16::MAX has five digits
        let mut reversed = [0u8; 5];
        let mut count = 0;
        let mut rest = value;
        loop {
            reversed[count] = b'0' + (rest % 10) as u8;
            count += 1;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }

        let len = count.min(VALUE_DIGITS);
        let mut digits = [0u8; VALUE_DIGITS];
        for (slot, digit) in digits.iter_mut().zip(reversed[..count].iter().rev()).take(len) {
            *slot = *digit;
        }

        Self { digits, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digits[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII digits are ever stored
        core::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }
}

impl fmt::Display for ValueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of the response, sent with a single `Transport::send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    Literal(&'static str),
    Value(ValueToken),
}

impl Fragment {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Fragment::Literal(text) => text.as_bytes(),
            Fragment::Value(token) => token.as_bytes(),
        }
    }
}

/// Ordered fragments of the response page for `reading`.
pub fn fragments(reading: &SensorReading) -> [Fragment; FRAGMENT_COUNT] {
    let raw = ValueToken::new(reading.raw);
    let half = ValueToken::new(reading.half());

    [
        Fragment::Literal(HEADER_AND_STYLE),
        Fragment::Value(raw),
        Fragment::Literal(GAUGE_OPEN),
        Fragment::Value(half),
        Fragment::Literal(GRADIENT_STOP),
        Fragment::Value(half),
        Fragment::Literal(GAUGE_CLOSE),
        Fragment::Literal(FOOTER),
    ]
}

/// Stream the whole response page to `transport`.
///
/// Stops at the first failed send and returns its error; the caller must then
/// reset the socket instead of closing it gracefully. On success returns the
/// number of bytes written.
pub fn compose<T: Transport + ?Sized>(
    reading: &SensorReading,
    transport: &mut T,
) -> Result<usize, TransportError> {
    let mut written = 0;
    for fragment in fragments(reading).iter() {
        transport.send(fragment.as_bytes())?;
        written += fragment.as_bytes().len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::transport::SocketState;

    fn reading(raw: u16) -> SensorReading {
        SensorReading { channel: 2, raw }
    }

    fn values(reading: &SensorReading) -> Vec<String> {
        fragments(reading)
            .iter()
            .filter_map(|fragment| match fragment {
                Fragment::Value(token) => Some(token.to_string()),
                Fragment::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn value_tokens_have_no_leading_zeros() {
        assert_eq!(ValueToken::new(0).as_str(), "0");
        assert_eq!(ValueToken::new(7).as_str(), "7");
        assert_eq!(ValueToken::new(40).as_str(), "40");
        assert_eq!(ValueToken::new(512).as_str(), "512");
    }

    #[test]
    fn wide_values_keep_leading_digits() {
        assert_eq!(ValueToken::new(4095).as_str(), "409");
        assert_eq!(ValueToken::new(u16::MAX).as_str(), "655");
    }

    #[test]
    fn raw_value_precedes_two_half_values() {
        assert_eq!(values(&reading(512)), ["512", "256", "256"]);
        assert_eq!(values(&reading(99)), ["99", "49", "49"]);
        assert_eq!(values(&reading(1)), ["1", "0", "0"]);
    }

    #[test]
    fn page_starts_with_status_line_and_headers() {
        let mut transport = MockTransport::new(SocketState::Established);
        compose(&reading(512), &mut transport).unwrap();

        let page = transport.sent_text();
        assert!(page.starts_with(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\nRefresh: 5\r\n\r\n"
        ));
        assert!(page.contains("content: '512';"));
        assert!(page.contains("conic-gradient(#4caf50 0% 256%, #f44336 256% 100%);"));
        assert!(page.ends_with("</html>\r\n"));
    }

    #[test]
    fn paragraph_keeps_its_fixed_wording() {
        let mut transport = MockTransport::new(SocketState::Established);
        compose(&reading(512), &mut transport).unwrap();

        let page = transport.sent_text();
        assert!(page.contains("        <p>Analog input 1 is </p>\r\n</div>\r\n</body>"));
        assert_eq!(transport.sends[FRAGMENT_COUNT - 1], FOOTER.as_bytes());
    }

    #[test]
    fn every_fragment_is_its_own_send() {
        let mut transport = MockTransport::new(SocketState::Established);
        let written = compose(&reading(300), &mut transport).unwrap();

        assert_eq!(transport.sends.len(), FRAGMENT_COUNT);
        assert_eq!(written, transport.sent_bytes().len());
        assert_eq!(transport.sends[1], b"300");
        assert_eq!(transport.sends[3], b"150");
        assert_eq!(transport.sends[5], b"150");
    }

    #[test]
    fn failed_send_stops_the_page() {
        let mut transport = MockTransport::new(SocketState::Established);
        transport.fail_send_at = Some(3);

        let result = compose(&reading(512), &mut transport);

        assert_eq!(result, Err(TransportError::Send));
        // the failing attempt is counted, nothing after it is tried
        assert_eq!(transport.send_attempts, 4);
        assert_eq!(transport.sends.len(), 3);
    }
}
