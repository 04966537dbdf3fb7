/// Register layout shared by the zone simulator and every zone client.
pub mod register_map {
    use crate::domain::{round1, ZoneRuntimeState};

    pub const REG_CURRENT_TEMP: u16 = 0;
    pub const REG_TARGET_TEMP: u16 = 1;
    pub const REG_OCCUPANCY: u16 = 2;
    pub const REG_HEATER_STATUS: u16 = 3;
    pub const REGISTER_COUNT: u16 = 4;

    /// Temperatures travel as tenths of a degree.
    pub const TEMP_SCALE: f64 = 10.0;
    pub const DEFAULT_UNIT_ID: u8 = 1;

    pub fn encode_temp(celsius: f64) -> u16 {
        (celsius * TEMP_SCALE).round().clamp(0.0, f64::from(u16::MAX)) as u16
    }

    pub fn decode_temp(raw: u16) -> f64 {
        round1(f64::from(raw) / TEMP_SCALE)
    }

    pub fn encode_state(state: &ZoneRuntimeState) -> [u16; REGISTER_COUNT as usize] {
        [
            encode_temp(state.current_temperature),
            encode_temp(state.target_temperature),
            u16::from(state.occupancy),
            u16::from(state.heater_on),
        ]
    }

    /// Inverse of [`encode_state`] at register precision.
    pub fn decode_state(regs: &[u16]) -> Option<ZoneRuntimeState> {
        match regs {
            [current, target, occupancy, heater, ..] => Some(ZoneRuntimeState {
                current_temperature: decode_temp(*current),
                target_temperature: decode_temp(*target),
                occupancy: *occupancy != 0,
                heater_on: *heater != 0,
            }),
            _ => None,
        }
    }

}

/// Modbus-TCP (MBAP) framing for the holding-register subset the zone
/// device speaks: read holding registers, write single register and
/// write multiple registers.
pub mod codec {
    use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
    use std::io::{self, Cursor, Read};

    pub const MBAP_HEADER_LEN: usize = 7;
    pub const MAX_READ_QUANTITY: u16 = 125;
    pub const MAX_WRITE_QUANTITY: u16 = 123;
    /// Largest legal PDU plus unit id, as carried in the MBAP length field.
    pub const MAX_FRAME_LENGTH: u16 = 254;

    pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    const EXCEPTION_FLAG: u8 = 0x80;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum ExceptionCode {
        IllegalFunction = 0x01,
        IllegalDataAddress = 0x02,
        IllegalDataValue = 0x03,
        ServerDeviceFailure = 0x04,
        GatewayTargetFailed = 0x0B,
    }

    impl ExceptionCode {
        pub fn from_u8(code: u8) -> Option<Self> {
            Some(match code {
                0x01 => Self::IllegalFunction,
                0x02 => Self::IllegalDataAddress,
                0x03 => Self::IllegalDataValue,
                0x04 => Self::ServerDeviceFailure,
                0x0B => Self::GatewayTargetFailed,
                _ => return None,
            })
        }
    }

    impl std::fmt::Display for ExceptionCode {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let name = match self {
                Self::IllegalFunction => "illegal function",
                Self::IllegalDataAddress => "illegal data address",
                Self::IllegalDataValue => "illegal data value",
                Self::ServerDeviceFailure => "server device failure",
                Self::GatewayTargetFailed => "gateway target device failed to respond",
            };
            write!(f, "{name} (0x{:02X})", *self as u8)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MbapHeader {
        pub transaction_id: u16,
        pub protocol_id: u16,
        /// Byte count of unit id plus PDU.
        pub length: u16,
        pub unit_id: u8,
    }

    impl MbapHeader {
        pub fn decode(buf: &[u8; MBAP_HEADER_LEN]) -> Self {
            Self {
                transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
                protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
                length: u16::from_be_bytes([buf[4], buf[5]]),
                unit_id: buf[6],
            }
        }

        pub fn pdu_len(&self) -> usize {
            usize::from(self.length.saturating_sub(1))
        }

        fn write_to(&self, pdu_len: usize, out: &mut Vec<u8>) -> io::Result<()> {
            let length = u16::try_from(pdu_len + 1)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PDU too long"))?;
            out.write_u16::<BigEndian>(self.transaction_id)?;
            out.write_u16::<BigEndian>(0)?;
            out.write_u16::<BigEndian>(length)?;
            out.write_u8(self.unit_id)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Request {
        ReadHoldingRegisters { start: u16, count: u16 },
        WriteSingleRegister { address: u16, value: u16 },
        WriteMultipleRegisters { start: u16, values: Vec<u16> },
    }

    impl Request {
        pub fn function_code(&self) -> u8 {
            match self {
                Self::ReadHoldingRegisters { .. } => FN_READ_HOLDING_REGISTERS,
                Self::WriteSingleRegister { .. } => FN_WRITE_SINGLE_REGISTER,
                Self::WriteMultipleRegisters { .. } => FN_WRITE_MULTIPLE_REGISTERS,
            }
        }

        /// Parse a request PDU. Errors carry the exception to answer with.
        pub fn decode(pdu: &[u8]) -> Result<Self, ExceptionCode> {
            let mut rdr = Cursor::new(pdu);
            let function = rdr.read_u8().map_err(|_| ExceptionCode::IllegalFunction)?;
            let short = |_: io::Error| ExceptionCode::IllegalDataValue;

            match function {
                FN_READ_HOLDING_REGISTERS => {
                    let start = rdr.read_u16::<BigEndian>().map_err(short)?;
                    let count = rdr.read_u16::<BigEndian>().map_err(short)?;
                    if count == 0 || count > MAX_READ_QUANTITY {
                        return Err(ExceptionCode::IllegalDataValue);
                    }
                    Ok(Self::ReadHoldingRegisters { start, count })
                }
                FN_WRITE_SINGLE_REGISTER => {
                    let address = rdr.read_u16::<BigEndian>().map_err(short)?;
                    let value = rdr.read_u16::<BigEndian>().map_err(short)?;
                    Ok(Self::WriteSingleRegister { address, value })
                }
                FN_WRITE_MULTIPLE_REGISTERS => {
                    let start = rdr.read_u16::<BigEndian>().map_err(short)?;
                    let count = rdr.read_u16::<BigEndian>().map_err(short)?;
                    let byte_count = rdr.read_u8().map_err(short)?;
                    if count == 0 || count > MAX_WRITE_QUANTITY || usize::from(byte_count) != usize::from(count) * 2 {
                        return Err(ExceptionCode::IllegalDataValue);
                    }
                    let values = (0..count)
                        .map(|_| rdr.read_u16::<BigEndian>())
                        .collect::<io::Result<Vec<_>>>()
                        .map_err(short)?;
                    Ok(Self::WriteMultipleRegisters { start, values })
                }
                _ => Err(ExceptionCode::IllegalFunction),
            }
        }

        pub fn encode_pdu(&self) -> io::Result<Vec<u8>> {
            let mut out = vec![self.function_code()];
            match self {
                Self::ReadHoldingRegisters { start, count } => {
                    out.write_u16::<BigEndian>(*start)?;
                    out.write_u16::<BigEndian>(*count)?;
                }
                Self::WriteSingleRegister { address, value } => {
                    out.write_u16::<BigEndian>(*address)?;
                    out.write_u16::<BigEndian>(*value)?;
                }
                Self::WriteMultipleRegisters { start, values } => {
                    let byte_count = u8::try_from(values.len() * 2)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many registers"))?;
                    out.write_u16::<BigEndian>(*start)?;
                    out.write_u16::<BigEndian>(values.len() as u16)?;
                    out.write_u8(byte_count)?;
                    for v in values {
                        out.write_u16::<BigEndian>(*v)?;
                    }
                }
            }
            Ok(out)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Response {
        ReadHoldingRegisters(Vec<u16>),
        WriteSingleRegister { address: u16, value: u16 },
        WriteMultipleRegisters { start: u16, count: u16 },
        Exception { function: u8, code: ExceptionCode },
    }

    impl Response {
        pub fn encode_pdu(&self) -> io::Result<Vec<u8>> {
            let mut out = Vec::with_capacity(8);
            match self {
                Self::ReadHoldingRegisters(values) => {
                    let byte_count = u8::try_from(values.len() * 2)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many registers"))?;
                    out.write_u8(FN_READ_HOLDING_REGISTERS)?;
                    out.write_u8(byte_count)?;
                    for v in values {
                        out.write_u16::<BigEndian>(*v)?;
                    }
                }
                Self::WriteSingleRegister { address, value } => {
                    out.write_u8(FN_WRITE_SINGLE_REGISTER)?;
                    out.write_u16::<BigEndian>(*address)?;
                    out.write_u16::<BigEndian>(*value)?;
                }
                Self::WriteMultipleRegisters { start, count } => {
                    out.write_u8(FN_WRITE_MULTIPLE_REGISTERS)?;
                    out.write_u16::<BigEndian>(*start)?;
                    out.write_u16::<BigEndian>(*count)?;
                }
                Self::Exception { function, code } => {
                    out.write_u8(function | EXCEPTION_FLAG)?;
                    out.write_u8(*code as u8)?;
                }
            }
            Ok(out)
        }

        pub fn decode_pdu(pdu: &[u8]) -> io::Result<Self> {
            let mut rdr = Cursor::new(pdu);
            let function = rdr.read_u8()?;
            if function & EXCEPTION_FLAG != 0 {
                let raw = rdr.read_u8()?;
                let code = ExceptionCode::from_u8(raw).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("unknown exception code {raw:#04x}"))
                })?;
                return Ok(Self::Exception {
                    function: function & !EXCEPTION_FLAG,
                    code,
                });
            }
            match function {
                FN_READ_HOLDING_REGISTERS => {
                    let byte_count = rdr.read_u8()?;
                    let mut bytes = vec![0u8; usize::from(byte_count)];
                    rdr.read_exact(&mut bytes)?;
                    let values = bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                    Ok(Self::ReadHoldingRegisters(values))
                }
                FN_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister {
                    address: rdr.read_u16::<BigEndian>()?,
                    value: rdr.read_u16::<BigEndian>()?,
                }),
                FN_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters {
                    start: rdr.read_u16::<BigEndian>()?,
                    count: rdr.read_u16::<BigEndian>()?,
                }),
                other => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported function code {other:#04x}"),
                )),
            }
        }
    }

    /// Full MBAP frame for `pdu`.
    pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> io::Result<Vec<u8>> {
        let header = MbapHeader {
            transaction_id,
            protocol_id: 0,
            length: 0,
            unit_id,
        };
        let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        header.write_to(pdu.len(), &mut out)?;
        out.extend_from_slice(pdu);
        Ok(out)
    }

    pub fn encode_request(transaction_id: u16, unit_id: u8, request: &Request) -> io::Result<Vec<u8>> {
        encode_frame(transaction_id, unit_id, &request.encode_pdu()?)
    }

}

/// TCP front end that exposes a [`RegisterBank`](server::RegisterBank).
pub mod server {
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::codec::{
        encode_frame, ExceptionCode, MbapHeader, Request, Response, MAX_FRAME_LENGTH, MBAP_HEADER_LEN,
    };

    /// Register storage a server answers from.
    pub trait RegisterBank: Send + Sync {
        fn read_holding(&self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode>;
        fn write_holding(&self, start: u16, values: &[u16]) -> Result<(), ExceptionCode>;
    }

    /// Answer one decoded request from `bank`.
    pub fn handle_request(bank: &dyn RegisterBank, request: &Request) -> Response {
        let function = request.function_code();
        let result = match request {
            Request::ReadHoldingRegisters { start, count } => bank
                .read_holding(*start, *count)
                .map(Response::ReadHoldingRegisters),
            Request::WriteSingleRegister { address, value } => bank
                .write_holding(*address, &[*value])
                .map(|()| Response::WriteSingleRegister {
                    address: *address,
                    value: *value,
                }),
            Request::WriteMultipleRegisters { start, values } => {
                bank.write_holding(*start, values)
                    .map(|()| Response::WriteMultipleRegisters {
                        start: *start,
                        count: values.len() as u16,
                    })
            }
        };
        result.unwrap_or_else(|code| Response::Exception { function, code })
    }

    /// Answer a raw PDU addressed to `unit_id` on a device whose id is `own_unit`.
    pub fn handle_pdu(bank: &dyn RegisterBank, own_unit: u8, unit_id: u8, pdu: &[u8]) -> Response {
        let function = pdu.first().copied().unwrap_or_default();
        if unit_id != own_unit {
            return Response::Exception {
                function,
                code: ExceptionCode::GatewayTargetFailed,
            };
        }
        match Request::decode(pdu) {
            Ok(request) => handle_request(bank, &request),
            Err(code) => Response::Exception { function, code },
        }
    }

    /// Accept connections until `cancel` fires. Each connection runs on its
    /// own task; a failing connection is logged and dropped.
    pub async fn serve(
        listener: TcpListener,
        bank: Arc<dyn RegisterBank>,
        unit_id: u8,
        cancel: CancellationToken,
    ) {
        let local = listener.local_addr().ok();
        info!(addr = ?local, unit_id, "register server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "register client connected");
                        let bank = Arc::clone(&bank);
                        let cancel = cancel.child_token();
                        connections.spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                res = handle_connection(stream, bank.as_ref(), unit_id) => {
                                    if let Err(e) = res {
                                        warn!(%peer, error = %e, "register connection failed");
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        info!(addr = ?local, "register server stopped");
    }

    async fn handle_connection(
        mut stream: TcpStream,
        bank: &dyn RegisterBank,
        own_unit: u8,
    ) -> std::io::Result<()> {
        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        loop {
            match stream.read_exact(&mut header_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }
            let header = MbapHeader::decode(&header_buf);
            if header.protocol_id != 0 || header.length < 2 || header.length > MAX_FRAME_LENGTH {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "malformed MBAP header (protocol {}, length {})",
                        header.protocol_id, header.length
                    ),
                ));
            }

            let mut pdu = vec![0u8; header.pdu_len()];
            stream.read_exact(&mut pdu).await?;

            let response = handle_pdu(bank, own_unit, header.unit_id, &pdu);
            if let Response::Exception { function, code } = &response {
                debug!(function, %code, "answering with exception");
            }
            let frame = encode_frame(header.transaction_id, header.unit_id, &response.encode_pdu()?)?;
            stream.write_all(&frame).await?;
        }
    }
}

#[cfg(feature = "modbus")]
pub mod client {
    use futures::future::BoxFuture;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tokio_modbus::client::tcp;
    use tokio_modbus::prelude::*;
    use tracing::{debug, warn};

    use crate::error::DeviceError;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    const MAX_RETRIES: u32 = 3;

    /// Shared Modbus-TCP connection with per-call timeout and retry.
    #[derive(Clone)]
    pub struct ModbusClient {
        context: Arc<Mutex<tokio_modbus::client::Context>>,
        unit_id: u8,
        addr: String,
        timeout_duration: Duration,
    }

    impl ModbusClient {
        pub async fn connect(addr: &str, unit_id: u8) -> Result<Self, DeviceError> {
            Self::connect_with_timeout(addr, unit_id, DEFAULT_TIMEOUT).await
        }

        pub async fn connect_with_timeout(
            addr: &str,
            unit_id: u8,
            timeout_duration: Duration,
        ) -> Result<Self, DeviceError> {
            let socket_addr = addr
                .parse()
                .map_err(|e| DeviceError::Unavailable(format!("invalid address {addr}: {e}")))?;

            debug!(addr, unit_id, "connecting to zone device");
            let ctx = timeout(timeout_duration, tcp::connect_slave(socket_addr, Slave(unit_id)))
                .await
                .map_err(|_| DeviceError::Timeout(timeout_duration))??;

            Ok(Self {
                context: Arc::new(Mutex::new(ctx)),
                unit_id,
                addr: addr.to_string(),
                timeout_duration,
            })
        }

        pub fn addr(&self) -> &str {
            &self.addr
        }

        pub async fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, DeviceError> {
            self.retry_operation(|ctx| Box::pin(async move { ctx.read_holding_registers(start, count).await }))
                .await
        }

        pub async fn write_single_register(&self, addr: u16, value: u16) -> Result<(), DeviceError> {
            self.retry_operation(|ctx| Box::pin(async move { ctx.write_single_register(addr, value).await }))
                .await
        }

        pub async fn reconnect(&self) -> Result<(), DeviceError> {
            warn!(addr = %self.addr, "reconnecting to zone device");
            let socket_addr = self
                .addr
                .parse()
                .map_err(|e| DeviceError::Unavailable(format!("invalid address {}: {e}", self.addr)))?;
            let new_ctx = timeout(self.timeout_duration, tcp::connect_slave(socket_addr, Slave(self.unit_id)))
                .await
                .map_err(|_| DeviceError::Timeout(self.timeout_duration))??;
            *self.context.lock().await = new_ctx;
            Ok(())
        }

        /// Exception responses reach us as `ErrorKind::Other` and are not retried.
        async fn retry_operation<F, T>(&self, operation: F) -> Result<T, DeviceError>
        where
            F: for<'a> Fn(&'a mut tokio_modbus::client::Context) -> BoxFuture<'a, io::Result<T>>,
        {
            let max_attempts = MAX_RETRIES.max(1);
            let mut last_err = DeviceError::Timeout(self.timeout_duration);

            for attempt in 1..=max_attempts {
                let mut ctx = self.context.lock().await;
                match timeout(self.timeout_duration, operation(&mut *ctx)).await {
                    Ok(Ok(result)) => {
                        if attempt > 1 {
                            debug!(attempt, "register operation succeeded after retry");
                        }
                        return Ok(result);
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Other => {
                        return Err(DeviceError::Rejected(e.to_string()));
                    }
                    Ok(Err(e)) => {
                        warn!(attempt, error = %e, "register operation failed");
                        last_err = DeviceError::Io(e);
                    }
                    Err(_) => {
                        warn!(attempt, "register operation timed out");
                        last_err = DeviceError::Timeout(self.timeout_duration);
                    }
                }
                drop(ctx);
                if attempt < max_attempts {
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
            }
            Err(last_err)
        }
    }
}
