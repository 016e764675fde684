//! [`IdentityAdapter`] over Win32 logon, SSPI, LSA lookup and NetApi calls.
//!
//! Raw `HANDLE`s and `CtxtHandle`s are kept in an arena behind a mutex and never leave this module.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::{io, ptr, slice};

use num_traits::{FromPrimitive, ToPrimitive};
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows_sys::Win32::NetworkManagement::NetManagement::{
    NetApiBufferFree, NetGetJoinInformation, NetGroupEnum, NetLocalGroupEnum, GROUP_INFO_0, LOCALGROUP_INFO_0,
};
use windows_sys::Win32::Networking::ActiveDirectory::{
    DsEnumerateDomainTrustsW, DsGetDcNameW, DOMAIN_CONTROLLER_INFOW, DS_DOMAIN_TRUSTSW,
};
use windows_sys::Win32::Security::Authentication::Identity::{
    AcceptSecurityContext, AcquireCredentialsHandleW, CompleteAuthToken, DeleteSecurityContext, FreeContextBuffer,
    FreeCredentialsHandle, InitializeSecurityContextW, QuerySecurityContextToken, TranslateNameW, SecBuffer,
    SecBufferDesc,
};
use windows_sys::Win32::Security::Credentials::SecHandle;
use windows_sys::Win32::Security::{
    GetLengthSid, GetTokenInformation, ImpersonateLoggedOnUser, LogonUserW, LookupAccountNameW, LookupAccountSidW,
    RevertToSelf, TokenGroups, TokenUser, SID_AND_ATTRIBUTES, TOKEN_GROUPS, TOKEN_USER,
};
use windows_sys::Win32::System::SystemInformation::GetComputerNameExW;
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetCurrentThread, OpenProcessToken, OpenThreadToken};

use super::{
    AccountRecord, ContextHandle, DomainTrust, IdentityAdapter, IdentityRecord, ImpersonationHandle, LogonProvider,
    LogonType, NativeError, NativeResult, NegotiationStep, TokenHandle,
};
use crate::error::NativeStatus;
use crate::identity::{Computer, DomainFlags, JoinStatus, TrustAttributes, TrustDirection, TrustType};
use crate::package::PackageList;
use crate::{Secret, SecurityPackage};

const SEC_I_CONTINUE_NEEDED: i32 = 0x0009_0312;
const SEC_I_COMPLETE_NEEDED: i32 = 0x0009_0313;
const SEC_I_COMPLETE_AND_CONTINUE: i32 = 0x0009_0314;

const SECPKG_CRED_INBOUND: u32 = 0x1;
const SECPKG_CRED_OUTBOUND: u32 = 0x2;
const SECURITY_NATIVE_DREP: u32 = 0x10;
const SECBUFFER_VERSION: u32 = 0;
const SECBUFFER_TOKEN: u32 = 2;

const ASC_REQ_ALLOCATE_MEMORY: u32 = 0x100;
const ASC_REQ_CONNECTION: u32 = 0x800;
const ISC_REQ_ALLOCATE_MEMORY: u32 = 0x100;
const ISC_REQ_CONNECTION: u32 = 0x800;

const ERROR_INVALID_DATA: u32 = 13;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
const ERROR_MORE_DATA: u32 = 234;
const ERROR_NO_TOKEN: u32 = 1008;
const NERR_SUCCESS: u32 = 0;

const TOKEN_QUERY: u32 = 0x8;
const SE_GROUP_LOGON_ID: u32 = 0xC000_0000;

const COMPUTER_NAME_NETBIOS: i32 = 0;
const NET_SETUP_UNJOINED: i32 = 1;
const NET_SETUP_WORKGROUP_NAME: i32 = 2;
const NET_SETUP_DOMAIN_NAME: i32 = 3;

const NAME_SAM_COMPATIBLE: i32 = 2;
const NAME_CANONICAL: i32 = 7;

const DS_DOMAIN_VALID_FLAGS: u32 = 0x3F;
const DS_RETURN_DNS_NAME: u32 = 0x4000_0000;
const DS_RETURN_FLAT_NAME: u32 = 0x8000_0000;
const MAX_PREFERRED_LENGTH: u32 = u32::MAX;

fn str_to_win_wstring(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect::<Vec<_>>()
}

fn os_error(code: u32) -> NativeError {
    NativeError::with_message(code, io::Error::from_raw_os_error(code as i32).to_string())
}

fn last_error() -> NativeError {
    os_error(unsafe { GetLastError() })
}

/// Turns an SSPI status into the success status or a [`NativeError`].
fn convert_sspi_status(status: i32) -> NativeResult<i32> {
    if status >= 0 {
        Ok(status)
    } else {
        Err(os_error(status as u32))
    }
}

fn convert_bool(result: i32) -> NativeResult<()> {
    if result != 0 {
        Ok(())
    } else {
        Err(last_error())
    }
}

fn convert_net_status(status: u32) -> NativeResult<()> {
    if status == NERR_SUCCESS {
        Ok(())
    } else {
        Err(os_error(status))
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
unsafe fn wide_ptr_to_string(ptr: *const u16) -> NativeResult<String> {
    if ptr.is_null() {
        return Ok(String::new());
    }

    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }

    let s = slice::from_raw_parts(ptr, len);

    String::from_utf16(s).map_err(|_| NativeError::with_message(ERROR_INVALID_DATA, "invalid UTF-16 string"))
}

fn wide_buffer_to_string(buffer: &[u16]) -> NativeResult<String> {
    let len = buffer.iter().position(|c| *c == 0).unwrap_or(buffer.len());

    String::from_utf16(&buffer[..len]).map_err(|_| NativeError::with_message(ERROR_INVALID_DATA, "invalid UTF-16 string"))
}

/// A kernel handle closed on drop.
struct OwnedHandle(HANDLE);

// SAFETY: token handles are process-wide kernel object references, usable from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

struct SecurityContext(SecHandle);

impl Drop for SecurityContext {
    fn drop(&mut self) {
        unsafe {
            DeleteSecurityContext(&self.0);
        }
    }
}

struct CredentialsGuard(SecHandle);

impl Drop for CredentialsGuard {
    fn drop(&mut self) {
        unsafe {
            FreeCredentialsHandle(&self.0);
        }
    }
}

/// A buffer allocated by a NetApi or DsApi call.
struct NetApiBuffer<T>(*mut T);

impl<T> Drop for NetApiBuffer<T> {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe {
                NetApiBufferFree(self.0 as *const c_void);
            }
        }
    }
}

struct ContextBuffer(*mut c_void);

impl Drop for ContextBuffer {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe {
                FreeContextBuffer(self.0);
            }
        }
    }
}

#[derive(Default)]
struct Arena {
    next_index: u64,
    tokens: HashMap<u64, Arc<OwnedHandle>>,
    contexts: HashMap<u64, SecurityContext>,
    impersonations: HashMap<u64, ThreadId>,
}

impl Arena {
    fn next_index(&mut self) -> u64 {
        self.next_index += 1;
        self.next_index
    }
}

pub struct WindowsAdapter {
    packages: PackageList,
    credentials: Mutex<HashMap<(SecurityPackage, u32), CredentialsGuard>>,
    arena: Mutex<Arena>,
}

impl std::fmt::Debug for WindowsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsAdapter")
            .field("packages", &self.packages)
            .finish_non_exhaustive()
    }
}

impl WindowsAdapter {
    pub fn new(packages: &PackageList) -> crate::Result<Self> {
        Ok(Self {
            packages: packages.clone(),
            credentials: Mutex::new(HashMap::new()),
            arena: Mutex::new(Arena::default()),
        })
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The ambient credentials of the process for `package`, acquired once per direction.
    fn credentials_handle(&self, package: SecurityPackage, credential_use: u32) -> NativeResult<SecHandle> {
        if !self.packages.contains(package) {
            return Err(NativeStatus::SecurityPackageNotFound.into());
        }

        let mut credentials = self.credentials.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(guard) = credentials.get(&(package, credential_use)) {
            return Ok(guard.0);
        }

        let package_name = str_to_win_wstring(package.name());
        let mut handle = SecHandle { dwLower: 0, dwUpper: 0 };
        let mut expiry = 0i64;

        unsafe {
            convert_sspi_status(AcquireCredentialsHandleW(
                ptr::null(),
                package_name.as_ptr(),
                credential_use,
                ptr::null(),
                ptr::null(),
                None,
                ptr::null(),
                &mut handle,
                &mut expiry,
            ))?;
        }
        debug!(%package, credential_use, "Acquired ambient credentials");

        credentials.insert((package, credential_use), CredentialsGuard(handle));

        Ok(handle)
    }

    fn context_sec_handle(&self, context: ContextHandle) -> NativeResult<SecHandle> {
        self.arena()
            .contexts
            .get(&context.index())
            .map(|context| context.0)
            .ok_or_else(|| NativeStatus::InvalidHandle.into())
    }

    fn token_handle(&self, token: TokenHandle) -> NativeResult<Arc<OwnedHandle>> {
        self.arena()
            .tokens
            .get(&token.index())
            .cloned()
            .ok_or_else(|| NativeStatus::InvalidHandle.into())
    }

    fn insert_token(&self, handle: OwnedHandle) -> TokenHandle {
        let mut arena = self.arena();
        let index = arena.next_index();
        arena.tokens.insert(index, Arc::new(handle));

        TokenHandle::new(index)
    }

    /// Runs one `AcceptSecurityContext` or `InitializeSecurityContextW` round and stores a newly
    /// created context in the arena.
    fn negotiate(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        round: impl FnOnce(*const SecHandle, *const SecBufferDesc, *mut SecHandle, *mut SecBufferDesc) -> i32,
    ) -> NativeResult<NegotiationStep> {
        let existing = context.map(|context| self.context_sec_handle(context)).transpose()?;

        let mut input = input.to_vec();
        let mut input_buffer = SecBuffer {
            cbBuffer: input.len() as u32,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: input.as_mut_ptr() as *mut c_void,
        };
        let input_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: &mut input_buffer,
        };
        let input_desc_ptr = if input.is_empty() { ptr::null() } else { &input_desc as *const _ };

        let mut output_buffer = SecBuffer {
            cbBuffer: 0,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: ptr::null_mut(),
        };
        let mut output_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: &mut output_buffer,
        };

        let mut new_context = existing.unwrap_or(SecHandle { dwLower: 0, dwUpper: 0 });
        let existing_ptr = existing.as_ref().map_or(ptr::null(), |handle| handle as *const _);

        let status = round(existing_ptr, input_desc_ptr, &mut new_context, &mut output_desc);
        let output_guard = ContextBuffer(output_buffer.pvBuffer);
        let status = convert_sspi_status(status)?;
        // A context created by this round is owned from here on, so early returns delete it.
        let created = existing.is_none().then(|| SecurityContext(new_context));

        if status == SEC_I_COMPLETE_NEEDED || status == SEC_I_COMPLETE_AND_CONTINUE {
            unsafe {
                convert_sspi_status(CompleteAuthToken(&new_context, &output_desc))?;
            }
        }

        let output = if output_guard.0.is_null() || output_buffer.cbBuffer == 0 {
            None
        } else {
            Some(unsafe { slice::from_raw_parts(output_guard.0 as *const u8, output_buffer.cbBuffer as usize) }.to_vec())
        };

        let context = match (context, created) {
            (Some(context), _) => context,
            (None, Some(created)) => {
                let mut arena = self.arena();
                let index = arena.next_index();
                arena.contexts.insert(index, created);

                ContextHandle::new(index)
            }
            (None, None) => unreachable!("a first round always creates a context"),
        };

        Ok(NegotiationStep {
            context,
            output,
            continue_needed: status == SEC_I_CONTINUE_NEEDED || status == SEC_I_COMPLETE_AND_CONTINUE,
        })
    }

    fn token_information(token: HANDLE, class: i32) -> NativeResult<Vec<u64>> {
        let mut len = 0u32;
        unsafe {
            GetTokenInformation(token, class, ptr::null_mut(), 0, &mut len);
        }
        let code = unsafe { GetLastError() };
        if code != ERROR_INSUFFICIENT_BUFFER {
            return Err(os_error(code));
        }

        // u64 storage keeps the SID_AND_ATTRIBUTES entries aligned.
        let mut buffer = vec![0u64; (len as usize).div_ceil(8)];
        unsafe {
            convert_bool(GetTokenInformation(
                token,
                class,
                buffer.as_mut_ptr() as *mut c_void,
                len,
                &mut len,
            ))?;
        }

        Ok(buffer)
    }

    /// # Safety
    ///
    /// `sid` must point to a valid SID.
    unsafe fn sid_to_bytes(sid: *mut c_void) -> Vec<u8> {
        let len = GetLengthSid(sid);

        slice::from_raw_parts(sid as *const u8, len as usize).to_vec()
    }

    /// # Safety
    ///
    /// `sid` must point to a valid SID.
    unsafe fn lookup_sid(sid: *mut c_void) -> NativeResult<String> {
        let mut name = vec![0u16; 256];
        let mut domain = vec![0u16; 256];
        let mut name_len = name.len() as u32;
        let mut domain_len = domain.len() as u32;
        let mut sid_use = 0;

        convert_bool(LookupAccountSidW(
            ptr::null(),
            sid,
            name.as_mut_ptr(),
            &mut name_len,
            domain.as_mut_ptr(),
            &mut domain_len,
            &mut sid_use,
        ))?;

        let name = wide_buffer_to_string(&name)?;
        let domain = wide_buffer_to_string(&domain)?;

        Ok(if domain.is_empty() { name } else { format!("{domain}\\{name}") })
    }

    fn identity_from_token(token: HANDLE) -> NativeResult<IdentityRecord> {
        let user = Self::token_information(token, TokenUser)?;
        let user = unsafe { &*(user.as_ptr() as *const TOKEN_USER) };
        let sid = unsafe { Self::sid_to_bytes(user.User.Sid) };
        let fqn = unsafe { Self::lookup_sid(user.User.Sid)? };

        let groups_buffer = Self::token_information(token, TokenGroups)?;
        let groups = unsafe {
            let groups = &*(groups_buffer.as_ptr() as *const TOKEN_GROUPS);
            let entries: &[SID_AND_ATTRIBUTES] =
                slice::from_raw_parts(groups.Groups.as_ptr(), groups.GroupCount as usize);

            entries
                .iter()
                .filter(|group| group.Attributes & SE_GROUP_LOGON_ID != SE_GROUP_LOGON_ID)
                .filter_map(|group| match Self::lookup_sid(group.Sid) {
                    Ok(name) => Some(name),
                    Err(err) => {
                        trace!(%err, "Skipping unmapped group SID");
                        None
                    }
                })
                .collect()
        };

        Ok(IdentityRecord { sid, fqn, groups })
    }

    fn join_information() -> NativeResult<(JoinStatus, String)> {
        let mut name = ptr::null_mut();
        let mut status = 0;

        unsafe {
            convert_net_status(NetGetJoinInformation(ptr::null(), &mut name, &mut status))?;
        }
        let name = NetApiBuffer(name);
        let name = unsafe { wide_ptr_to_string(name.0)? };

        Ok(match status {
            NET_SETUP_DOMAIN_NAME => (JoinStatus::DomainJoined, name),
            NET_SETUP_UNJOINED | NET_SETUP_WORKGROUP_NAME => (JoinStatus::NotJoined, String::new()),
            _ => (JoinStatus::Unknown, String::new()),
        })
    }

    /// NetBIOS name of the domain known as `fqn`.
    fn flat_domain_name(fqn: &str) -> NativeResult<String> {
        Self::domain_name(fqn, DS_RETURN_FLAT_NAME)
    }

    /// DNS name of the domain known as `name`.
    fn dns_domain_name(name: &str) -> NativeResult<String> {
        Self::domain_name(name, DS_RETURN_DNS_NAME)
    }

    fn domain_name(name: &str, flags: u32) -> NativeResult<String> {
        let domain = str_to_win_wstring(name);
        let mut info: *mut DOMAIN_CONTROLLER_INFOW = ptr::null_mut();

        unsafe {
            convert_net_status(DsGetDcNameW(
                ptr::null(),
                domain.as_ptr(),
                ptr::null(),
                ptr::null(),
                flags,
                &mut info,
            ))?;
        }
        let info = NetApiBuffer(info);

        unsafe { wide_ptr_to_string((*info.0).DomainName) }
    }

    fn domain_controller(fqn: &str) -> NativeResult<String> {
        let domain = str_to_win_wstring(fqn);
        let mut info: *mut DOMAIN_CONTROLLER_INFOW = ptr::null_mut();

        unsafe {
            convert_net_status(DsGetDcNameW(
                ptr::null(),
                domain.as_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                &mut info,
            ))?;
        }
        let info = NetApiBuffer(info);

        unsafe { wide_ptr_to_string((*info.0).DomainControllerName) }
    }
}

impl IdentityAdapter for WindowsAdapter {
    #[instrument(level = "trace", skip(self, password))]
    fn logon(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> NativeResult<TokenHandle> {
        let username = str_to_win_wstring(username);
        // "." restricts the logon to the local account database.
        let domain = str_to_win_wstring(domain.unwrap_or("."));
        let password = Secret::new(str_to_win_wstring(password.as_ref()));
        let mut token = ptr::null_mut();

        unsafe {
            convert_bool(LogonUserW(
                username.as_ptr(),
                domain.as_ptr(),
                password.as_ref().as_ptr(),
                logon_type.to_u32().unwrap_or_default(),
                logon_provider.to_u32().unwrap_or_default(),
                &mut token,
            ))?;
        }

        Ok(self.insert_token(OwnedHandle(token)))
    }

    fn continue_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
    ) -> NativeResult<NegotiationStep> {
        let credentials = self.credentials_handle(package, SECPKG_CRED_INBOUND)?;

        self.negotiate(context, input, |existing, input, new_context, output| {
            let mut attributes = 0;
            let mut expiry = 0i64;

            unsafe {
                AcceptSecurityContext(
                    &credentials,
                    existing,
                    input,
                    ASC_REQ_ALLOCATE_MEMORY | ASC_REQ_CONNECTION,
                    SECURITY_NATIVE_DREP,
                    new_context,
                    output,
                    &mut attributes,
                    &mut expiry,
                )
            }
        })
    }

    fn initialize_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
        target_name: Option<&str>,
    ) -> NativeResult<NegotiationStep> {
        let credentials = self.credentials_handle(package, SECPKG_CRED_OUTBOUND)?;
        let target_name = target_name.map(str_to_win_wstring);

        self.negotiate(context, input, |existing, input, new_context, output| {
            let mut attributes = 0;
            let mut expiry = 0i64;

            unsafe {
                InitializeSecurityContextW(
                    &credentials,
                    existing,
                    target_name.as_ref().map_or(ptr::null(), |name| name.as_ptr()),
                    ISC_REQ_ALLOCATE_MEMORY | ISC_REQ_CONNECTION,
                    0,
                    SECURITY_NATIVE_DREP,
                    input,
                    0,
                    new_context,
                    output,
                    &mut attributes,
                    &mut expiry,
                )
            }
        })
    }

    fn context_token(&self, context: ContextHandle) -> NativeResult<TokenHandle> {
        let handle = self.context_sec_handle(context)?;
        let mut token = ptr::null_mut();

        unsafe {
            convert_sspi_status(QuerySecurityContextToken(&handle, &mut token))?;
        }

        Ok(self.insert_token(OwnedHandle(token)))
    }

    fn resolve_identity(&self, token: TokenHandle) -> NativeResult<IdentityRecord> {
        let token = self.token_handle(token)?;

        Self::identity_from_token(token.0)
    }

    fn resolve_account(&self, name: &str) -> NativeResult<AccountRecord> {
        let account_name = str_to_win_wstring(name);
        let mut sid = vec![0u8; 68];
        let mut sid_len = sid.len() as u32;
        let mut domain = vec![0u16; 256];
        let mut domain_len = domain.len() as u32;
        let mut sid_use = 0;

        unsafe {
            convert_bool(LookupAccountNameW(
                ptr::null(),
                account_name.as_ptr(),
                sid.as_mut_ptr() as *mut c_void,
                &mut sid_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut sid_use,
            ))?;
        }
        sid.truncate(sid_len as usize);

        // The name is looked up again to get its canonical spelling.
        let fqn = unsafe { Self::lookup_sid(sid.as_mut_ptr() as *mut c_void)? };

        Ok(AccountRecord { sid, fqn })
    }

    fn effective_identity(&self) -> NativeResult<IdentityRecord> {
        let mut token = ptr::null_mut();

        let opened = unsafe { OpenThreadToken(GetCurrentThread(), TOKEN_QUERY, 1, &mut token) };
        if opened == 0 {
            let code = unsafe { GetLastError() };
            if code != ERROR_NO_TOKEN {
                return Err(os_error(code));
            }

            unsafe {
                convert_bool(OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token))?;
            }
        }
        let token = OwnedHandle(token);

        Self::identity_from_token(token.0)
    }

    fn query_computer(&self) -> NativeResult<Computer> {
        let mut name = vec![0u16; 256];
        let mut name_len = name.len() as u32;
        unsafe {
            convert_bool(GetComputerNameExW(COMPUTER_NAME_NETBIOS, name.as_mut_ptr(), &mut name_len))?;
        }
        let name = wide_buffer_to_string(&name)?;

        let (join_status, flat_name) = Self::join_information()?;
        // Report the name `DsEnumerateDomainTrustsW` uses as the domain fqn.
        let member_of = if flat_name.is_empty() {
            flat_name
        } else {
            Self::dns_domain_name(&flat_name).unwrap_or(flat_name)
        };

        let mut buffer: *mut u8 = ptr::null_mut();
        let mut read = 0;
        let mut total = 0;
        let status = unsafe {
            NetLocalGroupEnum(
                ptr::null(),
                0,
                &mut buffer,
                MAX_PREFERRED_LENGTH,
                &mut read,
                &mut total,
                ptr::null_mut(),
            )
        };
        let buffer = NetApiBuffer(buffer as *mut LOCALGROUP_INFO_0);
        if status != ERROR_MORE_DATA {
            convert_net_status(status)?;
        }

        let groups = if buffer.0.is_null() {
            Vec::new()
        } else {
            unsafe { slice::from_raw_parts(buffer.0, read as usize) }
                .iter()
                .map(|group| unsafe { wide_ptr_to_string(group.lgrpi0_name) })
                .collect::<NativeResult<Vec<_>>>()?
        };

        Ok(Computer {
            name,
            member_of,
            join_status,
            groups,
        })
    }

    fn query_domains(&self) -> NativeResult<Vec<DomainTrust>> {
        let (join_status, _) = Self::join_information()?;
        if join_status == JoinStatus::NotJoined {
            return Err(NativeStatus::SetupNotJoined.into());
        }

        let mut domains: *mut DS_DOMAIN_TRUSTSW = ptr::null_mut();
        let mut count = 0;
        unsafe {
            convert_net_status(DsEnumerateDomainTrustsW(
                ptr::null(),
                DS_DOMAIN_VALID_FLAGS,
                &mut domains,
                &mut count,
            ))?;
        }
        let domains = NetApiBuffer(domains);
        if domains.0.is_null() {
            return Ok(Vec::new());
        }

        unsafe { slice::from_raw_parts(domains.0, count as usize) }
            .iter()
            .map(|domain| {
                let netbios_name = unsafe { wide_ptr_to_string(domain.NetbiosDomainName)? };
                let dns_name = unsafe { wide_ptr_to_string(domain.DnsDomainName)? };
                let flags = DomainFlags::from_bits_truncate(domain.Flags);

                Ok(DomainTrust {
                    netbios_name,
                    dns_name: (!dns_name.is_empty()).then_some(dns_name),
                    trust_direction: TrustDirection::from_flags(flags),
                    trust_type: TrustType::from_u32(domain.TrustType).unwrap_or(TrustType::Downlevel),
                    trust_attributes: TrustAttributes::from_bits_truncate(domain.TrustAttributes),
                    flags,
                })
            })
            .collect()
    }

    fn query_domain_canonical_name(&self, fqn: &str) -> NativeResult<String> {
        let flat_name = Self::flat_domain_name(fqn)?;
        let account_name = str_to_win_wstring(&format!("{flat_name}\\"));
        let mut name = vec![0u16; 512];
        let mut name_len = name.len() as u32;

        let translated = unsafe {
            TranslateNameW(
                account_name.as_ptr(),
                NAME_SAM_COMPATIBLE,
                NAME_CANONICAL,
                name.as_mut_ptr(),
                &mut name_len,
            )
        };
        if translated == 0 {
            return Err(last_error());
        }

        let canonical = wide_buffer_to_string(&name)?;

        Ok(canonical.trim_end_matches('/').to_owned())
    }

    fn query_domain_groups(&self, fqn: &str) -> NativeResult<Vec<String>> {
        let controller = str_to_win_wstring(&Self::domain_controller(fqn)?);

        let mut buffer: *mut u8 = ptr::null_mut();
        let mut read = 0;
        let mut total = 0;
        let status = unsafe {
            NetGroupEnum(
                controller.as_ptr(),
                0,
                &mut buffer,
                MAX_PREFERRED_LENGTH,
                &mut read,
                &mut total,
                ptr::null_mut(),
            )
        };
        let buffer = NetApiBuffer(buffer as *mut GROUP_INFO_0);
        if status != ERROR_MORE_DATA {
            convert_net_status(status)?;
        }
        if buffer.0.is_null() {
            return Ok(Vec::new());
        }

        unsafe { slice::from_raw_parts(buffer.0, read as usize) }
            .iter()
            .map(|group| unsafe { wide_ptr_to_string(group.grpi0_name) })
            .collect()
    }

    fn impersonate_thread(&self, token: TokenHandle) -> NativeResult<ImpersonationHandle> {
        let token = self.token_handle(token)?;

        unsafe {
            convert_bool(ImpersonateLoggedOnUser(token.0))?;
        }

        let mut arena = self.arena();
        let index = arena.next_index();
        arena.impersonations.insert(index, thread::current().id());

        Ok(ImpersonationHandle::new(index))
    }

    fn revert_thread(&self, handle: ImpersonationHandle) {
        let thread = self.arena().impersonations.remove(&handle.index());

        match thread {
            Some(thread) if thread == thread::current().id() => {
                if let Err(err) = convert_bool(unsafe { RevertToSelf() }) {
                    error!(%err, "RevertToSelf failed");
                }
            }
            Some(_) => error!("Impersonation reverted from a different thread"),
            None => warn!(handle = handle.index(), "Unknown impersonation handle"),
        }
    }

    fn release_context(&self, context: ContextHandle) {
        let removed = self.arena().contexts.remove(&context.index());
        if removed.is_none() {
            warn!(context = context.index(), "Unknown security context handle");
        }
    }

    fn release_token(&self, token: TokenHandle) {
        let removed = self.arena().tokens.remove(&token.index());
        if removed.is_none() {
            warn!(token = token.index(), "Unknown token handle");
        }
    }
}
